use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audit record of one execution of one scout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoutRun {
    pub scout_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub accepted_count: u32,
    pub not_accepted_count: u32,
    pub last_accepted_url: Option<String>,
    pub last_not_accepted_url: Option<String>,
    /// Error that ended the run, if any. Errors are recorded, never rethrown.
    pub exception: Option<String>,
}

impl ScoutRun {
    /// Placeholder for a scout without persisted history; it is due immediately.
    pub fn never_run(scout_id: impl Into<String>) -> Self {
        Self::started(scout_id, DateTime::<Utc>::UNIX_EPOCH)
    }

    pub fn started(scout_id: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            scout_id: scout_id.into(),
            start_time,
            end_time: start_time,
            accepted_count: 0,
            not_accepted_count: 0,
            last_accepted_url: None,
            last_not_accepted_url: None,
            exception: None,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.exception.is_some()
    }
}

/// How a scout run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Pagination ran out of pages.
    Exhausted,
    /// The acceptor stopped the walk (known territory or cancellation).
    Halted,
    Failed { error: String },
}

impl RunOutcome {
    pub fn error(&self) -> Option<&str> {
        match self {
            RunOutcome::Failed { error } => Some(error),
            RunOutcome::Exhausted | RunOutcome::Halted => None,
        }
    }
}
