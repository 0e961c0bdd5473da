//! Rolling backups of the latest record

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDateTime, Utc};

use crate::error::{io_error, PersistenceResult};

pub const DEFAULT_MAX_BACKUPS: usize = 5;

const PREFIX: &str = "index_";
const SUFFIX: &str = ".json";
const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupPolicy {
    pub max_backups: usize,

    /// Backups older than this are removed regardless of count
    pub max_age: Option<Duration>,
}

impl Default for BackupPolicy {
    fn default() -> Self {
        Self {
            max_backups: DEFAULT_MAX_BACKUPS,
            max_age: None,
        }
    }
}

/// `index_YYYYmmdd_HHMMSS_mmm.json` for a snapshot generated at `at`.
///
/// Names sort in chronological order.
pub fn backup_file_name(at: DateTime<Utc>) -> String {
    format!("{}{}{}", PREFIX, at.format("%Y%m%d_%H%M%S_%3f"), SUFFIX)
}

/// Timestamp encoded in a backup file name, to the second.
fn backup_time(name: &str) -> Option<DateTime<Utc>> {
    let stamp = name.strip_prefix(PREFIX)?.strip_suffix(SUFFIX)?;
    let seconds = stamp.get(..15)?;
    NaiveDateTime::parse_from_str(seconds, STAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Backup files in `dir`, oldest first.
pub fn list_backups(dir: &Path) -> PersistenceResult<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_error(dir)(e)),
    };

    let mut backups = Vec::new();
    for entry in entries {
        let path = entry.map_err(io_error(dir))?.path();
        let is_backup = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(PREFIX) && n.ends_with(SUFFIX));
        if is_backup {
            backups.push(path);
        }
    }
    backups.sort();
    Ok(backups)
}

/// Remove backups beyond the policy, oldest first. Returns the removed paths.
pub fn prune(dir: &Path, policy: &BackupPolicy, now: DateTime<Utc>) -> PersistenceResult<Vec<PathBuf>> {
    let backups = list_backups(dir)?;
    let excess = backups.len().saturating_sub(policy.max_backups);

    let mut removed = Vec::new();
    for (i, path) in backups.into_iter().enumerate() {
        let expired = match (policy.max_age, path.file_name().and_then(|n| n.to_str())) {
            (Some(max_age), Some(name)) => backup_time(name).is_some_and(|t| now - t > max_age),
            _ => false,
        };
        if i < excess || expired {
            fs::remove_file(&path).map_err(io_error(&path))?;
            tracing::debug!(backup = %path.display(), "Pruned backup");
            removed.push(path);
        }
    }
    Ok(removed)
}
