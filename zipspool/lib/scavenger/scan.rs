use std::{fs, time::Duration};

use chrono::Utc;

use crate::{
    lock::{ExclusiveAttempt, LockAttempt},
    utils, ZipspoolResult,
};

use super::{MergeStats, Scavenger};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of [`Scavenger::try_scan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// A merge pass ran.
    Completed(MergeStats),

    /// No pass ran.
    Skipped(SkipReason),
}

/// Why [`Scavenger::try_scan`] did not run a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another pass started less than one rotation span ago.
    RecentActivity(Duration),

    /// Another process or thread holds the lock.
    Busy,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Scavenger {
    /// Runs a merge pass unless another one is running or ran recently.
    ///
    /// Without `force`, the lock file's modification time is checked first and the pass is skipped
    /// if it is younger than one rotation span. Otherwise the lock is attempted for the configured
    /// timeout; on success a pass runs while the lock is held and the lock's timestamp marks it for
    /// everybody else.
    pub fn try_scan(&self, force: bool) -> ZipspoolResult<ScanOutcome> {
        let base = self.config.get_archive_base();
        fs::create_dir_all(utils::inbox_dir(base))?;

        let attempt = ExclusiveAttempt::new(utils::lock_path(base));
        if !force {
            if let Some(age) = attempt.last_activity_age() {
                if age < *self.config.get_rotation_span() {
                    tracing::debug!(
                        "last merge pass started {:?} ago ({}), skipping",
                        age,
                        attempt.path().display()
                    );
                    return Ok(ScanOutcome::Skipped(SkipReason::RecentActivity(age)));
                }
            }
        }

        let now = Utc::now();
        match attempt.try_acquire(*self.config.get_lock_timeout())? {
            LockAttempt::Busy => {
                tracing::debug!("another merge pass is running, skipping");
                Ok(ScanOutcome::Skipped(SkipReason::Busy))
            }
            LockAttempt::Held(_guard) => Ok(ScanOutcome::Completed(self.run_pass(now, force)?)),
        }
    }
}

impl ScanOutcome {
    /// Returns the pass statistics if a pass ran.
    pub fn stats(&self) -> Option<&MergeStats> {
        match self {
            ScanOutcome::Completed(stats) => Some(stats),
            ScanOutcome::Skipped(_) => None,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
