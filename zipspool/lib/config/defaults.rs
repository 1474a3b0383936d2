use std::time::Duration;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The default interval after which a spool seals its temporary container.
///
/// Writers and the scavenger must agree on this value.
pub const DEFAULT_ROTATION_SPAN: Duration = Duration::from_secs(5 * 60);

/// Whether spooled content is committed only when its write scope closed successfully.
pub const DEFAULT_SUCCESS_ONLY: bool = true;

/// The size at which an active destination container is rotated to a numbered sibling (50 GiB).
pub const DEFAULT_SIZE_CAP: u64 = 50 * 1024 * 1024 * 1024;

/// The external program used to repair corrupt containers.
pub const DEFAULT_REPAIR_PROGRAM: &str = "zip";

/// How long a merge pass may wait for the advisory lock before skipping.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(10);

/// How long the daemon lets an in-flight merge pass finish after cancellation.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30 * 60);

/// Factor applied to the rotation span before a temporary container becomes eligible for merging.
pub const MERGE_GRACE_FACTOR: f64 = 1.5;
