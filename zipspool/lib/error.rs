//! `zipspool::error` is a module containing error types for the zipspool project.

use std::{
    error::Error,
    fmt::{self, Display},
    path::PathBuf,
};

use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a zipspool-related operation.
pub type ZipspoolResult<T> = Result<T, ZipspoolError>;

/// An error that occurred while spooling or merging containers.
#[derive(pretty_error_debug::Debug, Error)]
pub enum ZipspoolError {
    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An error reported by the zip codec while opening or writing a container.
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// The bytes of a single entry could not be read although its container parses.
    #[error("cannot read entry {entry:?} from {container}: {source}")]
    ReadFault {
        /// The container holding the entry.
        container: PathBuf,

        /// The stored name of the entry.
        entry: String,

        /// The underlying read error.
        #[source]
        source: std::io::Error,
    },

    /// A container failed integrity validation and the repair step failed too.
    #[error("failed to repair container {path}: {reason}")]
    RepairFailed {
        /// The container that could not be repaired.
        path: PathBuf,

        /// Why the repair failed.
        reason: String,
    },

    /// A writer was given a path that is not a clean relative path.
    #[error("invalid relative path: {0}")]
    InvalidRelativePath(String),

    /// A file name does not follow the temporary container naming scheme.
    #[error("invalid temporary container name: {0}")]
    InvalidContainerName(String),

    /// A commit was attempted after the spool was shut down.
    #[error("spool is closed")]
    SpoolClosed,

    /// An invalid configuration was supplied.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A configuration file could not be parsed.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// An error that occurred when a join handle returned an error.
    #[error("join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    /// An error that can represent any error.
    #[error(transparent)]
    Custom(#[from] AnyError),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ZipspoolError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> ZipspoolError {
        ZipspoolError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// Creates a `RepairFailed` error for the given container.
    pub fn repair_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> ZipspoolError {
        ZipspoolError::RepairFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an `Ok` `ZipspoolResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> ZipspoolResult<T> {
    Result::Ok(value)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
