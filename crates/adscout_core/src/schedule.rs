use chrono::{DateTime, TimeDelta, Utc};

use crate::ScoutRun;

/// Where a registered scout currently is in the scheduler loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScoutPhase {
    #[default]
    Idle,
    Waiting {
        until: DateTime<Utc>,
    },
    Running,
}

/// Round-robin over registration order: a monotonic counter modulo the scout count.
///
/// The visiting order is stable but does not favour the most overdue scout, and
/// a scout registered later joins at whatever phase the counter has reached.
#[derive(Debug, Clone, Default)]
pub struct Rotation {
    counter: u64,
}

impl Rotation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_index(&mut self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        let index = (self.counter % len as u64) as usize;
        self.counter = self.counter.wrapping_add(1);
        Some(index)
    }
}

/// Earliest time the scout of `last` may run again.
pub fn next_run_due(last: &ScoutRun, throttle: TimeDelta) -> DateTime<Utc> {
    last.end_time
        .checked_add_signed(throttle)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Time left until `due`, or `None` once it has passed.
pub fn remaining_wait(now: DateTime<Utc>, due: DateTime<Utc>) -> Option<std::time::Duration> {
    if now >= due {
        return None;
    }
    (due - now).to_std().ok()
}
