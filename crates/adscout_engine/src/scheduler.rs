use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use adscout_core::{
    next_run_due, remaining_wait, Rotation, RunOutcome, RunTally, ScoutPhase, ScoutRun,
};
use adscout_logging::{scout_error, scout_info, scout_warn};
use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::scout::{Scout, ScoutFinish, ScoutStorage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Minimum idle time between the end of a run and the next run of the same scout.
    pub throttle: Duration,
    /// How often cancellation is checked while waiting.
    pub poll_interval: Duration,
    /// Consecutive already-known URLs tolerated before a run is halted.
    pub max_old_urls_in_line: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            throttle: Duration::from_secs(5 * 60),
            poll_interval: Duration::from_millis(30),
            max_old_urls_in_line: 20,
        }
    }
}

#[derive(Debug, Error)]
#[error("run audit failure: {message}")]
pub struct AuditError {
    pub message: String,
}

impl AuditError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Durable record of scout runs.
pub trait RunAudit: Send + Sync {
    /// Most recent run of `scout_id`, if one was ever recorded.
    fn last_run(&self, scout_id: &str) -> Result<Option<ScoutRun>, AuditError>;
    fn record(&self, run: &ScoutRun) -> Result<(), AuditError>;
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scout `{id}` is already registered")]
    DuplicateScout { id: String },
    #[error("scheduler is already running")]
    AlreadyRunning,
    #[error(transparent)]
    Audit(#[from] AuditError),
}

struct Registered {
    id: String,
    scout: Arc<Scout>,
    last_run: ScoutRun,
    phase: ScoutPhase,
}

struct Shared {
    settings: SchedulerSettings,
    storage: Arc<dyn ScoutStorage>,
    audit: Arc<dyn RunAudit>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    scouts: Mutex<Vec<Registered>>,
    running: AtomicBool,
}

/// Runs registered scouts one at a time, forever, until cancelled.
///
/// Scouts are visited round-robin in registration order. Each one waits until
/// its throttle window after the previous run has passed. Run failures are
/// recorded on the run and never stop the loop.
#[derive(Clone)]
pub struct ScoutScheduler {
    shared: Arc<Shared>,
}

impl ScoutScheduler {
    pub fn new(
        settings: SchedulerSettings,
        storage: Arc<dyn ScoutStorage>,
        audit: Arc<dyn RunAudit>,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                settings,
                storage,
                audit,
                clock,
                cancel,
                scouts: Mutex::new(Vec::new()),
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Registers a scout and seeds its throttle from the audit's last run.
    pub fn add_scout(&self, id: impl Into<String>, scout: Scout) -> Result<(), SchedulerError> {
        let id = id.into();
        let mut scouts = self.shared.scouts();
        if scouts.iter().any(|s| s.id == id) {
            return Err(SchedulerError::DuplicateScout { id });
        }
        let last_run = self
            .shared
            .audit
            .last_run(&id)?
            .unwrap_or_else(|| ScoutRun::never_run(id.clone()));
        scout_info!(
            "Registered scout {} ({}), last run ended {}",
            id,
            scout.start_url(),
            last_run.end_time
        );
        scouts.push(Registered {
            id,
            scout: Arc::new(scout),
            last_run,
            phase: ScoutPhase::Idle,
        });
        Ok(())
    }

    /// Spawns the scheduler loop on the current tokio runtime.
    pub fn start(&self) -> Result<JoinHandle<()>, SchedulerError> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }
        let shared = Arc::clone(&self.shared);
        Ok(tokio::spawn(async move {
            shared.run_loop().await;
            shared.running.store(false, Ordering::SeqCst);
        }))
    }

    /// Requests the loop to stop after the current wait or run.
    pub fn stop(&self) {
        self.shared.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    pub fn scout_ids(&self) -> Vec<String> {
        self.shared.scouts().iter().map(|s| s.id.clone()).collect()
    }

    pub fn phase(&self, id: &str) -> Option<ScoutPhase> {
        self.shared.scouts().iter().find(|s| s.id == id).map(|s| s.phase)
    }

    pub fn last_run(&self, id: &str) -> Option<ScoutRun> {
        self.shared
            .scouts()
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.last_run.clone())
    }
}

impl Shared {
    fn scouts(&self) -> MutexGuard<'_, Vec<Registered>> {
        self.scouts.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn update(&self, id: &str, apply: impl FnOnce(&mut Registered)) {
        if let Some(entry) = self.scouts().iter_mut().find(|s| s.id == id) {
            apply(entry);
        }
    }

    async fn run_loop(&self) {
        scout_info!("Scout scheduler started");
        let throttle = TimeDelta::from_std(self.settings.throttle)
            .unwrap_or_else(|_| TimeDelta::days(365));
        let mut rotation = Rotation::new();

        while !self.cancel.is_cancelled() {
            let picked = {
                let scouts = self.scouts();
                rotation.next_index(scouts.len()).map(|index| {
                    let entry = &scouts[index];
                    (
                        entry.id.clone(),
                        Arc::clone(&entry.scout),
                        next_run_due(&entry.last_run, throttle),
                    )
                })
            };
            let Some((id, scout, due)) = picked else {
                self.clock.sleep(self.settings.poll_interval).await;
                continue;
            };

            self.update(&id, |s| s.phase = ScoutPhase::Waiting { until: due });
            if !self.wait_until(due).await {
                self.update(&id, |s| s.phase = ScoutPhase::Idle);
                break;
            }

            self.update(&id, |s| s.phase = ScoutPhase::Running);
            let run = self.run_scout(&id, &scout).await;
            if let Err(err) = self.audit.record(&run) {
                scout_error!("Could not record run of scout {}: {}", id, err);
            }
            self.update(&id, |s| {
                s.last_run = run;
                s.phase = ScoutPhase::Idle;
            });
        }
        scout_info!("Scout scheduler stopped");
    }

    /// Sleeps in poll-sized steps until `due`; `false` if cancelled first.
    async fn wait_until(&self, due: DateTime<Utc>) -> bool {
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            match remaining_wait(self.clock.now(), due) {
                None => return true,
                Some(left) => {
                    self.clock
                        .sleep(left.min(self.settings.poll_interval))
                        .await
                }
            }
        }
    }

    async fn run_scout(&self, id: &str, scout: &Scout) -> ScoutRun {
        let start_time = self.clock.now();
        scout_info!("Scout {} starting at {}", id, scout.start_url());

        let cancel = &self.cancel;
        let mut tally = RunTally::new(self.settings.max_old_urls_in_line);
        let walk = {
            let mut acceptor = |url: &str, storage: &dyn ScoutStorage| -> bool {
                if cancel.is_cancelled() {
                    return false;
                }
                match storage.register_offer_url(url) {
                    Ok(is_new) => tally.observe(url, is_new),
                    Err(err) => {
                        tally.fail(err.to_string());
                        false
                    }
                }
            };
            scout.scout(self.storage.as_ref(), &mut acceptor).await
        };

        let walk = match walk {
            Ok(summary) => match summary.finish {
                ScoutFinish::Exhausted => RunOutcome::Exhausted,
                ScoutFinish::Halted => RunOutcome::Halted,
            },
            Err(err) => RunOutcome::Failed {
                error: err.to_string(),
            },
        };
        let outcome = tally.resolve(walk);
        let run = tally.into_run(id, start_time, self.clock.now(), &outcome);

        match &outcome {
            RunOutcome::Failed { error } => {
                scout_warn!(
                    "Scout {} failed after {} new offers: {}",
                    id,
                    run.accepted_count,
                    error
                )
            }
            RunOutcome::Exhausted | RunOutcome::Halted => scout_info!(
                "Scout {} finished ({:?}): {} new, {} known",
                id,
                outcome,
                run.accepted_count,
                run.not_accepted_count
            ),
        }
        run
    }
}
