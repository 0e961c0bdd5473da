//! Latest record, history and backups in one data directory

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Duration;
use hyperindex_core::{Clock, Snapshot, SystemClock};

use crate::atomic::{read_json, write_json_atomic, StagedFile};
use crate::backup::{self, BackupPolicy};
use crate::error::{io_error, PersistenceResult};
use crate::health::HealthReporter;
use crate::history::{HistoryEntry, HistoryRecord, RetentionPolicy};
use crate::lock::WriterLock;

pub const LATEST_FILE: &str = "index_latest.json";
pub const HISTORY_FILE: &str = "history.json";
pub const BACKUP_DIR: &str = "backups";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOptions {
    pub backups: BackupPolicy,
    pub retention: RetentionPolicy,
}

#[derive(Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
    options: StoreOptions,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("dir", &self.dir)
            .field("options", &self.options)
            .finish()
    }
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>, options: StoreOptions) -> Self {
        Self {
            dir: dir.into(),
            options,
            clock: Arc::new(SystemClock),
        }
    }

    /// Clock used to age backups.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn latest_path(&self) -> PathBuf {
        self.dir.join(LATEST_FILE)
    }

    pub fn history_path(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.dir.join(BACKUP_DIR)
    }

    pub fn health(&self) -> HealthReporter {
        HealthReporter::new(&self.dir)
    }

    /// Take the single-writer lock for this directory.
    pub fn lock(&self, stale_after: Duration) -> PersistenceResult<WriterLock> {
        WriterLock::acquire(&self.dir, stale_after, self.clock.now())
    }

    pub fn read_latest(&self) -> PersistenceResult<Option<Snapshot>> {
        read_json(&self.latest_path())
    }

    /// Stored history, empty when none has been written yet.
    pub fn read_history(&self) -> PersistenceResult<HistoryRecord> {
        Ok(read_json(&self.history_path())?.unwrap_or_default())
    }

    pub fn write_latest(&self, snapshot: &Snapshot) -> PersistenceResult<()> {
        write_json_atomic(&self.latest_path(), snapshot)
    }

    /// Load, append, prune and rewrite the history record.
    pub fn append_history(&self, snapshot: &Snapshot) -> PersistenceResult<()> {
        let history = self.history_with(snapshot)?;
        write_json_atomic(&self.history_path(), &history)
    }

    fn history_with(&self, snapshot: &Snapshot) -> PersistenceResult<HistoryRecord> {
        let mut history = self.read_history()?;
        history.append(HistoryEntry::from(snapshot), &self.options.retention)?;
        Ok(history)
    }

    /// Copy the current latest record into `backups/`, then prune.
    ///
    /// Returns the new backup's path, or `None` when there was nothing to
    /// copy or a backup of that snapshot already exists.
    pub fn rotate_backup(&self) -> PersistenceResult<Option<PathBuf>> {
        let latest_path = self.latest_path();
        let bytes = match fs::read(&latest_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&latest_path)(e)),
        };

        let previous: Snapshot = match serde_json::from_slice(&bytes) {
            Ok(previous) => previous,
            Err(e) => {
                tracing::warn!(path = %latest_path.display(), error = %e, "Latest record unreadable, not backed up");
                return Ok(None);
            }
        };

        let backup_dir = self.backup_dir();
        let target = backup_dir.join(backup::backup_file_name(previous.generated_at));
        let created = if target.exists() {
            None
        } else {
            StagedFile::stage_bytes(&target, &bytes)?.commit()?;
            tracing::debug!(backup = %target.display(), "Backed up latest record");
            Some(target)
        };

        backup::prune(&backup_dir, &self.options.backups, self.clock.now())?;
        Ok(created)
    }

    /// Persist a run's snapshot as latest and as a new history entry.
    ///
    /// Both records are staged and validated before either is replaced, so a
    /// failure before the commit leaves the previous files as they were.
    pub fn persist(&self, snapshot: &Snapshot) -> PersistenceResult<()> {
        let history = self.history_with(snapshot)?;
        self.rotate_backup()?;

        let latest_stage = StagedFile::stage_json(&self.latest_path(), snapshot)?;
        let history_stage = StagedFile::stage_json(&self.history_path(), &history)?;
        latest_stage.commit()?;
        history_stage.commit()?;

        tracing::info!(
            generated_at = %snapshot.generated_at,
            assets = snapshot.assets.len(),
            history_points = history.entries.len(),
            "Persisted snapshot"
        );
        Ok(())
    }
}
