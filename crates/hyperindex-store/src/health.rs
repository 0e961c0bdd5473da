//! Health record for external monitoring
//!
//! `.health` holds the outcome of the most recent run. It is overwritten
//! every run and never grows.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::atomic::{read_json, write_json_atomic};
use crate::error::PersistenceResult;

pub const HEALTH_FILE: &str = ".health";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

/// Which stage of the cycle failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Cohort,
    AllWalletsFailed,
    Aggregation,
    Persistence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub timestamp: DateTime<Utc>,
    pub outcome: Outcome,
    /// Wall time of the run, in milliseconds
    #[serde(rename = "duration")]
    pub duration_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,

    #[serde(default)]
    pub wallets_total: usize,

    #[serde(default)]
    pub wallets_failed: usize,

    #[serde(default)]
    pub failure_rate: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conviction: Option<f64>,

    #[serde(default)]
    pub consecutive_failures: u32,
}

impl HealthStatus {
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    pub fn wallets_ok(&self) -> usize {
        self.wallets_total.saturating_sub(self.wallets_failed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunFailure {
    pub kind: FailureKind,
    pub detail: String,
}

/// What a finished cycle reports.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub finished_at: DateTime<Utc>,
    pub duration: Duration,
    pub wallets_total: usize,
    pub wallets_failed: usize,
    pub conviction: Option<f64>,
    pub failure: Option<RunFailure>,
}

/// Reads and overwrites the health record in a data directory.
#[derive(Debug, Clone)]
pub struct HealthReporter {
    path: PathBuf,
}

impl HealthReporter {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(HEALTH_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current record, `None` before the first run. An unreadable record is
    /// treated as absent.
    pub fn read(&self) -> Option<HealthStatus> {
        match read_json(&self.path) {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Ignoring unreadable health record");
                None
            }
        }
    }

    /// Replace the record with `report`, carrying the failure streak forward.
    pub fn record(&self, report: &RunReport) -> PersistenceResult<HealthStatus> {
        let previous_failures = self.read().map(|s| s.consecutive_failures).unwrap_or(0);

        let (outcome, consecutive_failures) = match report.failure {
            None => (Outcome::Success, 0),
            Some(_) => (Outcome::Failure, previous_failures.saturating_add(1)),
        };
        let failure_rate = if report.wallets_total > 0 {
            report.wallets_failed as f64 / report.wallets_total as f64
        } else {
            0.0
        };

        let status = HealthStatus {
            timestamp: report.finished_at,
            outcome,
            duration_ms: u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX),
            error_detail: report.failure.as_ref().map(|f| f.detail.clone()),
            error_kind: report.failure.as_ref().map(|f| f.kind),
            wallets_total: report.wallets_total,
            wallets_failed: report.wallets_failed,
            failure_rate,
            conviction: report.conviction,
            consecutive_failures,
        };

        write_json_atomic(&self.path, &status)?;
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn report(failure: Option<RunFailure>) -> RunReport {
        RunReport {
            finished_at: Utc.with_ymd_and_hms(2026, 2, 18, 12, 0, 3).unwrap(),
            duration: Duration::from_millis(2750),
            wallets_total: 40,
            wallets_failed: 4,
            conviction: failure.is_none().then_some(0.31),
            failure,
        }
    }

    fn failed() -> Option<RunFailure> {
        Some(RunFailure {
            kind: FailureKind::AllWalletsFailed,
            detail: "all 40 wallet fetches failed".to_string(),
        })
    }

    #[test]
    fn test_absent_before_first_run() {
        let dir = tempfile::tempdir().unwrap();
        assert!(HealthReporter::new(dir.path()).read().is_none());
    }

    #[test]
    fn test_success_record() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = HealthReporter::new(dir.path());

        let status = reporter.record(&report(None)).unwrap();

        assert_eq!(status.outcome, Outcome::Success);
        assert_eq!(status.duration_ms, 2750);
        assert_eq!(status.failure_rate, 0.1);
        assert_eq!(status.wallets_ok(), 36);
        assert!(status.error_detail.is_none());
        assert_eq!(reporter.read(), Some(status));

        let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(reporter.path()).unwrap()).unwrap();
        assert_eq!(raw["duration"], 2750);
        assert!(raw.get("duration_ms").is_none());
    }

    #[test]
    fn test_failure_streak_carries_over_and_resets() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = HealthReporter::new(dir.path());

        reporter.record(&report(failed())).unwrap();
        let second = reporter.record(&report(failed())).unwrap();
        assert_eq!(second.outcome, Outcome::Failure);
        assert_eq!(second.consecutive_failures, 2);
        assert_eq!(second.error_kind, Some(FailureKind::AllWalletsFailed));
        assert_eq!(second.error_detail.as_deref(), Some("all 40 wallet fetches failed"));

        let recovered = reporter.record(&report(None)).unwrap();
        assert_eq!(recovered.consecutive_failures, 0);
    }

    #[test]
    fn test_unreadable_record_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(HEALTH_FILE), b"garbage").unwrap();
        let reporter = HealthReporter::new(dir.path());

        assert!(reporter.read().is_none());
        let status = reporter.record(&report(failed())).unwrap();
        assert_eq!(status.consecutive_failures, 1);
    }

    #[test]
    fn test_serialized_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = HealthReporter::new(dir.path());
        reporter.record(&report(failed())).unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(reporter.path()).unwrap()).unwrap();
        assert_eq!(raw["outcome"], "failure");
        assert_eq!(raw["error_kind"], "all_wallets_failed");
        assert!(raw.get("conviction").is_none());
    }
}
