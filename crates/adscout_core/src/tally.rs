use chrono::{DateTime, Utc};

use crate::{RunOutcome, ScoutRun};

/// Per-run acceptor bookkeeping.
///
/// Counts accepted and rejected URLs and enforces the consecutive-rejection
/// bound: once more than `max_old_in_line` URLs in a row were rejected, the
/// walk should stop.
#[derive(Debug, Clone)]
pub struct RunTally {
    max_old_in_line: usize,
    old_in_line: usize,
    accepted_count: u32,
    not_accepted_count: u32,
    last_accepted_url: Option<String>,
    last_not_accepted_url: Option<String>,
    failure: Option<String>,
}

impl RunTally {
    pub fn new(max_old_in_line: usize) -> Self {
        Self {
            max_old_in_line,
            old_in_line: 0,
            accepted_count: 0,
            not_accepted_count: 0,
            last_accepted_url: None,
            last_not_accepted_url: None,
            failure: None,
        }
    }

    /// Records the dedup verdict for `url`; returns whether scouting should continue.
    pub fn observe(&mut self, url: &str, accepted: bool) -> bool {
        if accepted {
            self.accepted_count = self.accepted_count.saturating_add(1);
            self.last_accepted_url = Some(url.to_string());
            self.old_in_line = 0;
        } else {
            self.not_accepted_count = self.not_accepted_count.saturating_add(1);
            self.last_not_accepted_url = Some(url.to_string());
            self.old_in_line += 1;
        }
        self.old_in_line <= self.max_old_in_line
    }

    /// Records a collaborator failure; the first one wins.
    pub fn fail(&mut self, error: impl Into<String>) {
        if self.failure.is_none() {
            self.failure = Some(error.into());
        }
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn accepted_count(&self) -> u32 {
        self.accepted_count
    }

    pub fn not_accepted_count(&self) -> u32 {
        self.not_accepted_count
    }

    /// Final outcome: a recorded collaborator failure overrides the walk result.
    pub fn resolve(&self, walk: RunOutcome) -> RunOutcome {
        match (&self.failure, walk) {
            (_, failed @ RunOutcome::Failed { .. }) => failed,
            (Some(error), _) => RunOutcome::Failed {
                error: error.clone(),
            },
            (None, walk) => walk,
        }
    }

    pub fn into_run(
        self,
        scout_id: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        outcome: &RunOutcome,
    ) -> ScoutRun {
        ScoutRun {
            scout_id: scout_id.into(),
            start_time,
            end_time,
            accepted_count: self.accepted_count,
            not_accepted_count: self.not_accepted_count,
            last_accepted_url: self.last_accepted_url,
            last_not_accepted_url: self.last_not_accepted_url,
            exception: outcome.error().map(str::to_string),
        }
    }
}
