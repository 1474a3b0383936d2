//! Cross-process advisory locking for merge passes.
//!
//! A single well-known file in the inbox serves two purposes: it is `flock`ed exclusively while a
//! merge pass runs, and its modification time records when the last pass started. Callers that
//! see a recent timestamp can skip the lock attempt entirely.

use std::{
    fs::{File, OpenOptions},
    io::ErrorKind,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant, SystemTime},
};

use fs2::FileExt;

use crate::ZipspoolResult;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// How often a contended lock is retried until the timeout runs out.
const RETRY_INTERVAL: Duration = Duration::from_millis(2);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The capability to attempt an exclusive lock on a shared lock file.
#[derive(Debug, Clone)]
pub struct ExclusiveAttempt {
    /// Path of the lock file.
    path: PathBuf,
}

/// The result of [`ExclusiveAttempt::try_acquire`].
#[derive(Debug)]
pub enum LockAttempt {
    /// The lock is held until the guard is dropped.
    Held(LockGuard),

    /// Another holder kept the lock for the whole timeout.
    Busy,
}

/// An acquired lock, released on drop.
#[derive(Debug)]
pub struct LockGuard {
    /// The locked file.
    file: File,

    /// Path of the lock file.
    path: PathBuf,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ExclusiveAttempt {
    /// Creates an attempt on the lock file at `path`. Nothing is touched until it is used.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns how long ago the lock file was last touched, or `None` if it does not exist.
    ///
    /// A modification time in the future counts as zero age.
    pub fn last_activity_age(&self) -> Option<Duration> {
        let modified = std::fs::metadata(&self.path).ok()?.modified().ok()?;
        Some(
            SystemTime::now()
                .duration_since(modified)
                .unwrap_or(Duration::ZERO),
        )
    }

    /// Tries to lock the file exclusively, retrying until `timeout` has passed.
    ///
    /// On success the lock file's modification time is refreshed, marking activity for other
    /// callers of [`ExclusiveAttempt::last_activity_age`].
    pub fn try_acquire(&self, timeout: Duration) -> ZipspoolResult<LockAttempt> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;

        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) if is_contended(&e) => {
                    if Instant::now() >= deadline {
                        tracing::debug!("lock {} is busy", self.path.display());
                        return Ok(LockAttempt::Busy);
                    }
                    thread::sleep(RETRY_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }

        file.set_modified(SystemTime::now())?;
        tracing::debug!("acquired lock {}", self.path.display());

        Ok(LockAttempt::Held(LockGuard {
            file,
            path: self.path.clone(),
        }))
    }
}

impl LockAttempt {
    /// Returns `true` if the lock was acquired.
    pub fn is_held(&self) -> bool {
        matches!(self, LockAttempt::Held(_))
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn is_contended(error: &std::io::Error) -> bool {
    error.kind() == ErrorKind::WouldBlock
        || error.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!("failed to release lock {}: {}", self.path.display(), e);
        } else {
            tracing::debug!("released lock {}", self.path.display());
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
