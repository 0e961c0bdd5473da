//! Single-writer lock on the data directory
//!
//! The lock is a `.lock` file holding the owner's pid, acquisition time and a
//! per-acquisition token. It is written in full under a private name and then
//! hard-linked into place, so `.lock` never exists half-written and only one
//! writer can publish it. A lock older than the stale threshold belongs to a
//! writer that died without cleaning up and is taken over. An unreadable lock
//! is aged by its modification time.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{io_error, PersistenceError, PersistenceResult};

pub const LOCK_FILE: &str = ".lock";

/// Publish attempts before giving up on a lock that keeps changing hands.
const MAX_ATTEMPTS: usize = 3;

static ACQUISITIONS: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LockOwner {
    pid: u32,
    acquired_at: DateTime<Utc>,
    #[serde(default)]
    token: String,
}

/// Guard for the writer lock. Dropping it releases the lock.
#[derive(Debug)]
pub struct WriterLock {
    path: PathBuf,
    token: String,
}

impl WriterLock {
    pub fn acquire(dir: &Path, stale_after: Duration, now: DateTime<Utc>) -> PersistenceResult<Self> {
        fs::create_dir_all(dir).map_err(io_error(dir))?;
        let path = dir.join(LOCK_FILE);
        let owner = LockOwner {
            pid: std::process::id(),
            acquired_at: now,
            token: new_token(),
        };

        for _ in 0..MAX_ATTEMPTS {
            match publish(&path, &owner) {
                Ok(()) => {
                    return Ok(Self {
                        path,
                        token: owner.token,
                    })
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(io_error(&path)(e)),
            }

            let observed = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error(&path)(e)),
            };
            let holder: Option<LockOwner> = serde_json::from_slice(&observed).ok();
            let since = match &holder {
                Some(holder) => holder.acquired_at,
                None => match modified_at(&path) {
                    Ok(since) => since,
                    Err(e) if e.kind() == ErrorKind::NotFound => continue,
                    Err(e) => return Err(io_error(&path)(e)),
                },
            };

            if now - since <= stale_after {
                return Err(PersistenceError::Locked {
                    pid: holder.map(|h| h.pid),
                    since,
                });
            }

            tracing::warn!(
                lock = %path.display(),
                holder_pid = ?holder.as_ref().map(|h| h.pid),
                since = %since,
                "Taking over stale writer lock"
            );
            take_over(&path, &observed, &owner.token).map_err(io_error(&path))?;
        }

        Err(PersistenceError::Locked { pid: None, since: now })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        let still_ours = fs::read(&self.path)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<LockOwner>(&bytes).ok())
            .is_some_and(|owner| owner.token == self.token);
        if !still_ours {
            tracing::warn!(lock = %self.path.display(), "Writer lock was taken over before release");
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(lock = %self.path.display(), error = %e, "Failed to release writer lock");
        }
    }
}

fn new_token() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let seq = ACQUISITIONS.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}-{}", std::process::id(), nanos, seq)
}

fn private_path(lock: &Path, token: &str, suffix: &str) -> PathBuf {
    lock.with_file_name(format!("{}.{}.{}", LOCK_FILE, token, suffix))
}

/// Write the owner under a private name, then link it to `lock`.
/// Fails with `AlreadyExists` when another writer holds the lock.
fn publish(lock: &Path, owner: &LockOwner) -> std::io::Result<()> {
    let staged = private_path(lock, &owner.token, "tmp");
    let result = (|| {
        let mut file = OpenOptions::new().write(true).create_new(true).open(&staged)?;
        let body = serde_json::to_vec(owner).map_err(std::io::Error::other)?;
        file.write_all(&body)?;
        file.sync_all()?;
        fs::hard_link(&staged, lock)
    })();
    let _ = fs::remove_file(&staged);
    result
}

/// Move a stale lock out of the way.
///
/// Rename is the only step that touches `lock`, so of several writers racing
/// for the same stale lock exactly one moves it. If what was moved is not the
/// lock judged stale, a new owner published in between and it is put back.
fn take_over(lock: &Path, observed: &[u8], token: &str) -> std::io::Result<()> {
    let parked = private_path(lock, token, "stale");
    match fs::rename(lock, &parked) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    }

    let moved = fs::read(&parked);
    if !matches!(&moved, Ok(bytes) if bytes.as_slice() == observed) {
        if let Err(e) = fs::hard_link(&parked, lock) {
            tracing::warn!(lock = %lock.display(), error = %e, "Failed to restore live writer lock");
        }
    }
    fs::remove_file(&parked)
}

fn modified_at(path: &Path) -> std::io::Result<DateTime<Utc>> {
    Ok(DateTime::<Utc>::from(fs::metadata(path)?.modified()?))
}
