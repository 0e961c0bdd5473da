//! Atomic file replacement
//!
//! A record is first written to a hidden temp file next to its target,
//! fsynced and parsed back, and only then renamed over the target. Staging
//! and committing are separate steps so several records can be prepared
//! before any of them is replaced.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{io_error, PersistenceError, PersistenceResult};

/// A fully written and validated temp file waiting to replace its target.
///
/// Dropping an uncommitted stage removes the temp file and leaves the target
/// untouched.
#[derive(Debug)]
pub struct StagedFile {
    temp: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedFile {
    /// Serialize `value`, write it to the temp file and check it parses back as `T`.
    pub fn stage_json<T>(target: &Path, value: &T) -> PersistenceResult<Self>
    where
        T: Serialize + DeserializeOwned,
    {
        let bytes = serde_json::to_vec_pretty(value).map_err(|source| PersistenceError::Serialize {
            path: target.to_path_buf(),
            source,
        })?;
        let staged = Self::stage_bytes(target, &bytes)?;
        staged.validate::<T>()?;
        Ok(staged)
    }

    /// Write raw bytes to the temp file.
    pub fn stage_bytes(target: &Path, bytes: &[u8]) -> PersistenceResult<Self> {
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }

        let staged = Self {
            temp: temp_path(target),
            target: target.to_path_buf(),
            committed: false,
        };

        // A temp file left behind by a crashed writer is truncated here
        let mut file = File::create(&staged.temp).map_err(io_error(&staged.temp))?;
        file.write_all(bytes).map_err(io_error(&staged.temp))?;
        file.sync_all().map_err(io_error(&staged.temp))?;

        Ok(staged)
    }

    fn validate<T: DeserializeOwned>(&self) -> PersistenceResult<()> {
        let bytes = fs::read(&self.temp).map_err(io_error(&self.temp))?;
        serde_json::from_slice::<T>(&bytes)
            .map(|_| ())
            .map_err(|e| PersistenceError::Validate {
                path: self.target.clone(),
                reason: e.to_string(),
            })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Rename the temp file over the target.
    pub fn commit(mut self) -> PersistenceResult<()> {
        fs::rename(&self.temp, &self.target).map_err(io_error(&self.target))?;
        self.committed = true;
        sync_parent(&self.target);
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.temp);
        }
    }
}

/// Stage and commit in one step.
pub fn write_json_atomic<T>(target: &Path, value: &T) -> PersistenceResult<()>
where
    T: Serialize + DeserializeOwned,
{
    StagedFile::stage_json(target, value)?.commit()
}

/// Read a JSON record, `None` when the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> PersistenceResult<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_error(path)(e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| PersistenceError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

/// `.<name>.tmp` in the target's directory, so the rename never crosses filesystems.
pub fn temp_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.tmp", name))
}

/// Flush the directory entry after a rename. Best effort.
#[cfg(unix)]
fn sync_parent(target: &Path) {
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent(_target: &Path) {}
