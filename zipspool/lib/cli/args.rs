use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::{config::ZipspoolConfig, ZipspoolResult};

use super::styles;

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// zipspool - merges spooled temporary zip containers into destination archives
#[derive(Debug, Parser)]
#[command(name = "zipspool", author, about, version, styles = styles::styles())]
pub struct ZipspoolArgs {
    /// The subcommand to run
    #[command(subcommand)]
    pub subcommand: ZipspoolSubcommand,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available subcommands
#[derive(Debug, Subcommand)]
pub enum ZipspoolSubcommand {
    /// Run a single merge pass and print a summary if anything was merged
    #[command(name = "scan")]
    Scan {
        /// Shared settings
        #[command(flatten)]
        common: CommonArgs,

        /// Merge every temporary container regardless of age and recent activity
        #[arg(short, long)]
        flush: bool,
    },

    /// Run merge passes every rotation span until interrupted
    #[command(name = "daemon")]
    Daemon {
        /// Shared settings
        #[command(flatten)]
        common: CommonArgs,
    },
}

/// Settings shared by all subcommands
#[derive(Debug, Args)]
pub struct CommonArgs {
    /// The archive base holding the inbox and the destination containers
    #[arg(short = 'd', long = "dir", value_name = "PATH")]
    pub archive_base: Option<PathBuf>,

    /// Rotation span of the writers in seconds
    #[arg(short, long, value_name = "SECS")]
    pub rotation: Option<u64>,

    /// Size in bytes at which destination containers are rotated
    #[arg(long, value_name = "BYTES")]
    pub size_cap: Option<u64>,

    /// Program used to repair corrupt containers
    #[arg(long, value_name = "PROGRAM")]
    pub repair_program: Option<String>,

    /// Configuration file; flags override its values
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

//-------------------------------------------------------------------------------------------------
// Methods
//-------------------------------------------------------------------------------------------------

impl CommonArgs {
    /// Loads the configuration file, if any, and applies the flags on top of it.
    pub fn resolve(&self) -> ZipspoolResult<ZipspoolConfig> {
        let mut config = match &self.config {
            Some(path) => ZipspoolConfig::from_toml_file(path)?,
            None => ZipspoolConfig::default(),
        };

        if let Some(archive_base) = &self.archive_base {
            config = config.with_archive_base(archive_base);
        }
        if let Some(secs) = self.rotation {
            config = config.with_rotation_span(secs);
        }
        if let Some(size_cap) = self.size_cap {
            config = config.with_size_cap(size_cap);
        }
        if let Some(program) = &self.repair_program {
            config = config.with_repair_program(program);
        }

        Ok(config)
    }
}

//-------------------------------------------------------------------------------------------------
// Tests
//-------------------------------------------------------------------------------------------------
