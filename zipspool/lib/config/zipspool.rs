use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use getset::Getters;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{ZipspoolError, ZipspoolResult};

use super::{
    DEFAULT_LOCK_TIMEOUT, DEFAULT_REPAIR_PROGRAM, DEFAULT_ROTATION_SPAN, DEFAULT_SHUTDOWN_GRACE,
    DEFAULT_SIZE_CAP, DEFAULT_SUCCESS_ONLY,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Configuration of a writer-side spool.
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
pub struct SpoolConfig {
    /// The archive base; temporary containers go to its `inbox` sub directory.
    #[builder(setter(into))]
    archive_base: PathBuf,

    /// How often the current temporary container is sealed.
    #[builder(default = DEFAULT_ROTATION_SPAN)]
    rotation_span: Duration,

    /// Commit only content whose write scope closed successfully.
    #[builder(default = DEFAULT_SUCCESS_ONLY)]
    success_only: bool,
}

/// Configuration of the scavenger that merges temporary containers.
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
pub struct ScavengerConfig {
    /// The archive base holding the inbox and the destination containers.
    #[builder(setter(into))]
    archive_base: PathBuf,

    /// The rotation span used by the writers.
    #[builder(default = DEFAULT_ROTATION_SPAN)]
    rotation_span: Duration,

    /// Size in bytes at which a destination container is rotated out.
    #[builder(default = DEFAULT_SIZE_CAP)]
    size_cap: u64,

    /// Program invoked as `<program> -FF <path> --out <fixed>` to repair containers. Leading
    /// arguments may follow the program, separated by whitespace.
    #[builder(default = DEFAULT_REPAIR_PROGRAM.to_string(), setter(into))]
    repair_program: String,

    /// How long to wait for the advisory lock.
    #[builder(default = DEFAULT_LOCK_TIMEOUT)]
    lock_timeout: Duration,

    /// How long the daemon shields an in-flight pass after cancellation.
    #[builder(default = DEFAULT_SHUTDOWN_GRACE)]
    shutdown_grace: Duration,
}

/// The on-disk configuration file.
///
/// Every field is optional; missing values fall back to the defaults and command line flags
/// override whatever the file sets.
///
/// ```toml
/// archive_base = "/mnt/shared/archives"
/// rotation_span = 300
/// success_only = true
/// size_cap = 53687091200
/// repair_program = "zip"
/// lock_timeout_ms = 10
/// shutdown_grace = 1800
/// ```
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize, Getters)]
#[getset(get = "pub with_prefix")]
#[serde(deny_unknown_fields)]
pub struct ZipspoolConfig {
    /// The archive base.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    archive_base: Option<PathBuf>,

    /// The rotation span in seconds.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    rotation_span: Option<u64>,

    /// Commit only on success.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    success_only: Option<bool>,

    /// Destination size cap in bytes.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    size_cap: Option<u64>,

    /// The repair program.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    repair_program: Option<String>,

    /// Lock acquisition timeout in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    lock_timeout_ms: Option<u64>,

    /// Shutdown grace in seconds.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    shutdown_grace: Option<u64>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SpoolConfig {
    /// Checks the configuration for values the spool cannot run with.
    pub fn validate(&self) -> ZipspoolResult<()> {
        validate_rotation_span(self.rotation_span)
    }
}

impl ScavengerConfig {
    /// Checks the configuration for values the scavenger cannot run with.
    pub fn validate(&self) -> ZipspoolResult<()> {
        validate_rotation_span(self.rotation_span)?;
        if self.size_cap == 0 {
            return Err(ZipspoolError::Config("size cap must be positive".to_string()));
        }
        if self.repair_program.trim().is_empty() {
            return Err(ZipspoolError::Config(
                "repair program cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl ZipspoolConfig {
    /// Loads the configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> ZipspoolResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Parses the configuration from a TOML string.
    pub fn from_toml_str(contents: &str) -> ZipspoolResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Overrides the archive base.
    pub fn with_archive_base(mut self, archive_base: impl Into<PathBuf>) -> Self {
        self.archive_base = Some(archive_base.into());
        self
    }

    /// Overrides the rotation span in seconds.
    pub fn with_rotation_span(mut self, secs: u64) -> Self {
        self.rotation_span = Some(secs);
        self
    }

    /// Overrides the destination size cap.
    pub fn with_size_cap(mut self, size_cap: u64) -> Self {
        self.size_cap = Some(size_cap);
        self
    }

    /// Overrides the repair program.
    pub fn with_repair_program(mut self, program: impl Into<String>) -> Self {
        self.repair_program = Some(program.into());
        self
    }

    /// Builds the spool configuration, failing if no archive base is set.
    pub fn spool_config(&self) -> ZipspoolResult<SpoolConfig> {
        let config = SpoolConfig::builder()
            .archive_base(self.require_archive_base()?)
            .rotation_span(self.rotation_span_or_default())
            .success_only(self.success_only.unwrap_or(DEFAULT_SUCCESS_ONLY))
            .build();

        config.validate()?;
        Ok(config)
    }

    /// Builds the scavenger configuration, failing if no archive base is set.
    pub fn scavenger_config(&self) -> ZipspoolResult<ScavengerConfig> {
        let config = ScavengerConfig::builder()
            .archive_base(self.require_archive_base()?)
            .rotation_span(self.rotation_span_or_default())
            .size_cap(self.size_cap.unwrap_or(DEFAULT_SIZE_CAP))
            .repair_program(
                self.repair_program
                    .clone()
                    .unwrap_or_else(|| DEFAULT_REPAIR_PROGRAM.to_string()),
            )
            .lock_timeout(
                self.lock_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_LOCK_TIMEOUT),
            )
            .shutdown_grace(
                self.shutdown_grace
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_SHUTDOWN_GRACE),
            )
            .build();

        config.validate()?;
        Ok(config)
    }

    fn require_archive_base(&self) -> ZipspoolResult<PathBuf> {
        self.archive_base
            .clone()
            .ok_or_else(|| ZipspoolError::Config("archive base is not set".to_string()))
    }

    fn rotation_span_or_default(&self) -> Duration {
        self.rotation_span
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_ROTATION_SPAN)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn validate_rotation_span(rotation_span: Duration) -> ZipspoolResult<()> {
    if rotation_span.is_zero() {
        return Err(ZipspoolError::Config(
            "rotation span must be positive".to_string(),
        ));
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let spool = SpoolConfig::builder().archive_base("/tmp/base").build();
        assert_eq!(spool.get_rotation_span(), &DEFAULT_ROTATION_SPAN);
        assert!(*spool.get_success_only());

        let scavenger = ScavengerConfig::builder().archive_base("/tmp/base").build();
        assert_eq!(*scavenger.get_size_cap(), DEFAULT_SIZE_CAP);
        assert_eq!(scavenger.get_repair_program(), DEFAULT_REPAIR_PROGRAM);
        assert!(scavenger.validate().is_ok());
    }

    #[test]
    fn test_toml_config_with_overrides() -> anyhow::Result<()> {
        let config = ZipspoolConfig::from_toml_str(
            r#"
            archive_base = "/srv/archives"
            rotation_span = 60
            success_only = false
            size_cap = 1024
            "#,
        )?;

        let scavenger = config.clone().with_size_cap(2048).scavenger_config()?;
        assert_eq!(scavenger.get_archive_base(), Path::new("/srv/archives"));
        assert_eq!(scavenger.get_rotation_span(), &Duration::from_secs(60));
        assert_eq!(*scavenger.get_size_cap(), 2048);
        assert_eq!(scavenger.get_lock_timeout(), &DEFAULT_LOCK_TIMEOUT);

        let spool = config.spool_config()?;
        assert!(!*spool.get_success_only());

        Ok(())
    }

    #[test]
    fn test_invalid_configs() {
        assert!(matches!(
            ZipspoolConfig::default().scavenger_config(),
            Err(ZipspoolError::Config(_))
        ));
        assert!(matches!(
            ZipspoolConfig::from_toml_str("rotation = 3"),
            Err(ZipspoolError::ConfigParse(_))
        ));
        assert!(matches!(
            ZipspoolConfig::default()
                .with_archive_base("/x")
                .with_rotation_span(0)
                .spool_config(),
            Err(ZipspoolError::Config(_))
        ));
    }
}
