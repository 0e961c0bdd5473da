//! # HyperIndex Store
//!
//! File-backed persistence for HyperIndex. A data directory holds:
//!
//! - `index_latest.json`: the most recent [`Snapshot`](hyperindex_core::Snapshot)
//! - `history.json`: reduced snapshots for trend charts
//! - `backups/`: copies of earlier latest records
//! - `.health`: outcome of the last run
//! - `.lock`: present while a writer holds the directory
//!
//! Every file is replaced with write-to-temp, fsync, validate and rename, so a
//! reader never observes a half-written record.

pub mod atomic;
pub mod backup;
pub mod error;
pub mod health;
pub mod history;
pub mod lock;
pub mod snapshot_store;

pub use backup::BackupPolicy;
pub use error::{PersistenceError, PersistenceResult};
pub use health::{FailureKind, HealthReporter, HealthStatus, Outcome, RunFailure, RunReport};
pub use history::{AssetTrendPoint, DateRange, HistoryEntry, HistoryRecord, RetentionPolicy};
pub use lock::WriterLock;
pub use snapshot_store::{SnapshotStore, StoreOptions};
