//! Scheduler state machine and daemon loop
//!
//! [`Scheduler::tick`] runs at most one cycle and always returns to `Idle`,
//! whatever the cycle did. It takes the scheduler mutably, so two cycles
//! never overlap within a process; the writer lock covers other processes.
//! The one-shot command calls it once; the daemon calls it on every cadence
//! fire time.

use std::sync::Arc;
use std::time::Instant;

use hyperindex_core::{Cadence, Clock};
use hyperindex_store::{FailureKind, HealthReporter, RunFailure, RunReport};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::pipeline::{FetchStats, Pipeline};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Completed {
        generated_at: chrono::DateTime<chrono::Utc>,
        assets: usize,
        wallets_failed: usize,
    },
    Failed {
        kind: FailureKind,
        detail: String,
    },
    /// No cycle ran
    Skipped { reason: String },
    /// Persistence has failed too many times in a row
    Alarm {
        consecutive_failures: u32,
        detail: String,
    },
}

impl TickOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TickOutcome::Completed { .. } | TickOutcome::Skipped { .. })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Persistence failed {consecutive_failures} times in a row: {detail}")]
pub struct Alarm {
    pub consecutive_failures: u32,
    pub detail: String,
}

pub struct Scheduler {
    pipeline: Pipeline,
    health: HealthReporter,
    clock: Arc<dyn Clock>,
    state: SchedulerState,
    persistence_failures: u32,
    alarm_threshold: u32,
}

impl Scheduler {
    pub fn new(pipeline: Pipeline, clock: Arc<dyn Clock>, alarm_threshold: u32) -> Self {
        let health = pipeline.store().health();
        Self {
            pipeline,
            health,
            clock,
            state: SchedulerState::Idle,
            persistence_failures: 0,
            alarm_threshold: alarm_threshold.max(1),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Consecutive cycles that failed to persist.
    pub fn persistence_failures(&self) -> u32 {
        self.persistence_failures
    }

    /// Run one cycle and record its outcome.
    pub async fn tick(&mut self) -> TickOutcome {
        if self.state == SchedulerState::Running {
            // Only left behind by a tick future dropped mid-cycle
            tracing::warn!("Previous cycle was cancelled before it finished");
        }

        self.state = SchedulerState::Running;
        let run_id = uuid::Uuid::new_v4();
        let outcome = self
            .run_and_record()
            .instrument(tracing::info_span!("cycle", run_id = %run_id))
            .await;
        self.state = SchedulerState::Idle;
        outcome
    }

    async fn run_and_record(&mut self) -> TickOutcome {
        let start = Instant::now();
        tracing::info!("Cycle started");

        let result = self.pipeline.run_cycle().await;

        let (report, outcome) = match result {
            Ok(snapshot) => {
                self.persistence_failures = 0;
                tracing::info!(
                    generated_at = %snapshot.generated_at,
                    assets = snapshot.assets.len(),
                    wallets_failed = snapshot.wallets_failed,
                    conviction = snapshot.totals.conviction,
                    duration_ms = %start.elapsed().as_millis(),
                    "Cycle completed"
                );
                let report = RunReport {
                    finished_at: self.clock.now(),
                    duration: start.elapsed(),
                    wallets_total: snapshot.wallets_total,
                    wallets_failed: snapshot.wallets_failed,
                    conviction: Some(snapshot.totals.conviction),
                    failure: None,
                };
                let outcome = TickOutcome::Completed {
                    generated_at: snapshot.generated_at,
                    assets: snapshot.assets.len(),
                    wallets_failed: snapshot.wallets_failed,
                };
                (report, outcome)
            }
            Err(failure) if failure.error.is_locked() => {
                // The other writer reports its own health
                tracing::warn!(error = %failure.error, "Cycle skipped, data directory is locked");
                return TickOutcome::Skipped {
                    reason: failure.error.to_string(),
                };
            }
            Err(failure) => {
                let kind = failure.error.kind();
                let detail = failure.error.to_string();
                tracing::error!(
                    error = %detail,
                    kind = ?kind,
                    duration_ms = %start.elapsed().as_millis(),
                    "Cycle failed"
                );
                if kind == FailureKind::Persistence {
                    self.persistence_failures += 1;
                }
                (
                    self.failure_report(start, failure.stats, kind, detail.clone()),
                    TickOutcome::Failed { kind, detail },
                )
            }
        };

        let persistence_failed = matches!(outcome, TickOutcome::Failed { kind: FailureKind::Persistence, .. });
        match self.health.record(&report) {
            // A run that failed upstream still proves storage writable
            Ok(_) if !persistence_failed => self.persistence_failures = 0,
            Ok(_) => {}
            Err(e) => {
                // Storage that cannot take the health record cannot take snapshots either
                tracing::error!(error = %e, "Failed to record health");
                if !persistence_failed {
                    self.persistence_failures += 1;
                }
            }
        }

        if self.persistence_failures >= self.alarm_threshold {
            let detail = match &outcome {
                TickOutcome::Failed { detail, .. } => detail.clone(),
                _ => "health record could not be written".to_string(),
            };
            tracing::error!(
                consecutive_failures = self.persistence_failures,
                detail = %detail,
                "ALARM: persistence keeps failing"
            );
            return TickOutcome::Alarm {
                consecutive_failures: self.persistence_failures,
                detail,
            };
        }
        outcome
    }

    fn failure_report(&self, start: Instant, stats: FetchStats, kind: FailureKind, detail: String) -> RunReport {
        RunReport {
            finished_at: self.clock.now(),
            duration: start.elapsed(),
            wallets_total: stats.wallets_total,
            wallets_failed: stats.wallets_failed,
            conviction: None,
            failure: Some(RunFailure { kind, detail }),
        }
    }
}

/// Tick on every fire time of `cadence` until cancelled.
///
/// Fire times that pass while a cycle runs are dropped; the next wait is
/// computed from when the cycle finished. Returns an error on alarm.
pub async fn run_daemon(
    mut scheduler: Scheduler,
    cadence: Cadence,
    run_on_start: bool,
    shutdown: CancellationToken,
) -> Result<(), Alarm> {
    let mut run_now = run_on_start;

    loop {
        if run_now {
            if let TickOutcome::Alarm {
                consecutive_failures,
                detail,
            } = scheduler.tick().await
            {
                return Err(Alarm {
                    consecutive_failures,
                    detail,
                });
            }
        }

        let now = scheduler.clock.now();
        let next = cadence.next_after(now);
        let wait = (next - now).to_std().unwrap_or_default();
        tracing::info!(next_run = %next, wait_secs = wait.as_secs(), "Waiting for next run");

        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("Scheduler stopped");
                return Ok(());
            }
            _ = tokio::time::sleep(wait) => {}
        }
        run_now = true;
    }
}
