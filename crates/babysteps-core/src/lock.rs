//! Advisory file locks serializing startup maintenance against readers.
//!
//! The lock lives next to the store (`<store>.lock`). Startup, migration,
//! integrity repair and discard hold it exclusively; read-only commands hold
//! it shared.

use crate::db::sidecar_path;
use crate::error::ErrorCode;
use fs2::FileExt;
use std::{
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("{}: store lock timed out after {waited:?} at {}", ErrorCode::LockContention.code(), .path.display())]
    Timeout { path: PathBuf, waited: Duration },

    #[error("{}: {0}", ErrorCode::StoreWriteFailed.code())]
    Io(#[from] io::Error),
}

impl LockError {
    /// Machine-readable code associated with this lock error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::LockContention,
            Self::Io(_) => ErrorCode::StoreWriteFailed,
        }
    }

    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

/// Lock file guarding `store_path`.
#[must_use]
pub fn lock_path_for(store_path: &Path) -> PathBuf {
    sidecar_path(store_path, ".lock")
}

#[derive(Clone, Copy)]
enum LockKind {
    Shared,
    Exclusive,
}

#[derive(Debug)]
struct FileGuard {
    file: File,
    path: PathBuf,
}

impl FileGuard {
    fn acquire(path: &Path, timeout: Duration, kind: LockKind) -> Result<Self, LockError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        let start = Instant::now();
        loop {
            // std now has inherent `File` lock methods; call fs2 explicitly.
            let attempt = match kind {
                LockKind::Shared => FileExt::try_lock_shared(&file),
                LockKind::Exclusive => FileExt::try_lock_exclusive(&file),
            };
            if attempt.is_ok() {
                return Ok(Self {
                    file,
                    path: path.to_path_buf(),
                });
            }

            if start.elapsed() >= timeout {
                return Err(LockError::Timeout {
                    path: path.to_path_buf(),
                    waited: start.elapsed(),
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Drop for FileGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Exclusive lock held while the store is migrated, repaired or replaced.
#[derive(Debug)]
pub struct StoreLock {
    guard: FileGuard,
}

impl StoreLock {
    /// Acquire the exclusive lock for `store_path`, waiting up to `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Timeout`] when another holder keeps the lock, or
    /// an I/O error if the lock file cannot be created.
    pub fn acquire(store_path: &Path, timeout: Duration) -> Result<Self, LockError> {
        let path = lock_path_for(store_path);
        tracing::debug!(lock = %path.display(), "acquiring exclusive store lock");
        Ok(Self {
            guard: FileGuard::acquire(&path, timeout, LockKind::Exclusive)?,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.guard.path
    }
}

/// Shared lock for read-only access.
#[derive(Debug)]
pub struct StoreReadLock {
    guard: FileGuard,
}

impl StoreReadLock {
    /// Acquire a shared lock for `store_path`, waiting up to `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Timeout`] while an exclusive holder is active.
    pub fn acquire(store_path: &Path, timeout: Duration) -> Result<Self, LockError> {
        Ok(Self {
            guard: FileGuard::acquire(&lock_path_for(store_path), timeout, LockKind::Shared)?,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.guard.path
    }
}
