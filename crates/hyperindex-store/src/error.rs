//! Error types for HyperIndex Store

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to serialize {}: {source}", .path.display())]
    Serialize {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Staged {} failed validation: {reason}", .path.display())]
    Validate { path: PathBuf, reason: String },

    #[error("Corrupt record {}: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("History entry at {attempted} is not after the last entry at {last}")]
    OutOfOrder {
        last: DateTime<Utc>,
        attempted: DateTime<Utc>,
    },

    /// `pid` is `None` when the lock file could not be read.
    #[error(
        "Data directory is locked{} since {since}",
        .pid.map(|pid| format!(" by pid {}", pid)).unwrap_or_default()
    )]
    Locked {
        pid: Option<u32>,
        since: DateTime<Utc>,
    },
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Adapter for `map_err` on filesystem calls.
pub(crate) fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> PersistenceError + '_ {
    move |source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    }
}
