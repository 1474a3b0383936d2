//! The scavenger merges sealed temporary containers from the inbox into destination containers.
//!
//! Any number of scavengers, in any number of processes on any number of hosts, may point at the
//! same archive base. A lock file in the inbox makes sure only one of them runs a merge pass at a
//! time, and its timestamp lets the others skip their attempt while a pass is recent.
//!
//! Each entry `dest/rest` of a temporary container is appended as `rest` to the destination
//! container `<archive base>/dest.zip`. A name that already exists there is discarded, so the
//! first committed content wins.

mod daemon;
mod merge;
mod scan;

use std::{path::Path, time::Duration};

use chrono::{DateTime, Utc};

use crate::{config::ScavengerConfig, container::Repairer, ZipspoolResult};

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use daemon::*;
pub use merge::*;
pub use scan::*;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Merges temporary containers of one archive base.
#[derive(Debug, Clone)]
pub struct Scavenger {
    /// The scavenger configuration.
    config: ScavengerConfig,

    /// Repairs containers that fail to parse.
    repairer: Repairer,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Scavenger {
    /// Creates a scavenger, failing if the configuration is invalid.
    pub fn new(config: ScavengerConfig) -> ZipspoolResult<Self> {
        config.validate()?;
        let repairer = Repairer::new(config.get_repair_program().clone());
        Ok(Self { config, repairer })
    }

    /// Returns the scavenger configuration.
    pub fn config(&self) -> &ScavengerConfig {
        &self.config
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Runs [`Scavenger::try_scan`] on `archive_base` with default settings apart from the rotation
/// span.
pub fn try_scan(
    archive_base: impl AsRef<Path>,
    force: bool,
    rotation_span: Duration,
) -> ZipspoolResult<ScanOutcome> {
    default_scavenger(archive_base.as_ref(), rotation_span)?.try_scan(force)
}

/// Runs [`Scavenger::run_pass`] on `archive_base` with default settings apart from the rotation
/// span. The caller must hold the inbox lock.
pub fn run_pass(
    archive_base: impl AsRef<Path>,
    now: DateTime<Utc>,
    force: bool,
    rotation_span: Duration,
) -> ZipspoolResult<MergeStats> {
    default_scavenger(archive_base.as_ref(), rotation_span)?.run_pass(now, force)
}

fn default_scavenger(archive_base: &Path, rotation_span: Duration) -> ZipspoolResult<Scavenger> {
    Scavenger::new(
        ScavengerConfig::builder()
            .archive_base(archive_base)
            .rotation_span(rotation_span)
            .build(),
    )
}
