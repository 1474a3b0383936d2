//! `zipspool` collects the output of many concurrent producers into shared zip archives.
//!
//! # Overview
//!
//! Producers on any number of hosts write small files to a shared archive base. Instead of
//! creating one file per output, each producer process buffers its output in a temporary zip
//! container in the base's `inbox` directory and seals that container every rotation span.
//! A scavenger later merges sealed temporary containers into long-lived destination containers,
//! one per top-level name, and deletes them.
//!
//! - **Writer side**: [`spool::Spool`] owns the current temporary container and rotates it on a
//!   timer. Content is committed through scoped buffers or by picking up external files.
//! - **Merge side**: [`scavenger::Scavenger`] runs merge passes under a cross-host advisory lock,
//!   discards duplicate names, repairs corrupt containers and rotates destination containers that
//!   grow past a size cap.
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use std::{io::Write, time::Duration};
//!
//! use zipspool::{
//!     config::{ScavengerConfig, SpoolConfig},
//!     scavenger::Scavenger,
//!     spool::{Spool, WriteMode},
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let spool_config = SpoolConfig::builder()
//!         .archive_base("/mnt/shared/archives")
//!         .rotation_span(Duration::from_secs(300))
//!         .build();
//!
//!     Spool::run(spool_config, |spool| async move {
//!         let mut out = spool.scoped_write("run-42/logs/stdout.bin", WriteMode::Binary)?;
//!         out.write_all(b"done")?;
//!         out.close()
//!     })
//!     .await??;
//!
//!     let scavenger = Scavenger::new(
//!         ScavengerConfig::builder()
//!             .archive_base("/mnt/shared/archives")
//!             .build(),
//!     )?;
//!     scavenger.try_scan(true)?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`config`] - Configuration types and defaults
//! - [`container`] - Zip container reading, writing and repair
//! - [`lock`] - Cross-process advisory locking
//! - [`scavenger`] - Merge passes and the scavenger daemon
//! - [`spool`] - The writer-side spool
//! - [`utils`] - Naming and path helpers

#![warn(missing_docs)]

mod error;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod cli;
pub mod config;
pub mod container;
pub mod lock;
pub mod scavenger;
pub mod spool;
pub mod utils;

pub use error::*;
