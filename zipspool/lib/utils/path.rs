use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use typed_path::{Utf8UnixComponent, Utf8UnixPathBuf};

use crate::{ZipspoolError, ZipspoolResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The sub directory of an archive base where producers deposit temporary containers.
pub const INBOX_SUBDIR: &str = "inbox";

/// The filename of the advisory lock guarding merge passes.
pub const LOCK_FILENAME: &str = "zipspool.lock";

/// The extension shared by temporary and destination containers.
pub const CONTAINER_EXTENSION: &str = "zip";

/// The UTC timestamp format embedded in temporary container names.
pub const TIMESTAMP_FORMAT: &str = "%y%m%d_%H%M%S";

/// Number of hex characters in the uniqueness token of a temporary container name.
pub const TOKEN_LEN: usize = 8;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The parsed name of a temporary container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempContainerName {
    /// The host that opened the container.
    pub host: String,

    /// When the container was opened, at second resolution.
    pub opened_at: DateTime<Utc>,

    /// The uniqueness token, absent on containers written without one.
    pub token: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl TempContainerName {
    /// Creates a name for a container opened now on `host`, with a fresh random token.
    pub fn generate(host: impl Into<String>, opened_at: DateTime<Utc>) -> Self {
        Self {
            host: host.into(),
            opened_at,
            token: Some(format!("{:08x}", rand::random::<u32>())),
        }
    }

    /// Returns the file name, e.g. `node7-240131_235959-1a2b3c4d.zip`.
    pub fn file_name(&self) -> String {
        let stamp = self.opened_at.format(TIMESTAMP_FORMAT);
        match &self.token {
            Some(token) => format!("{}-{}-{}.{}", self.host, stamp, token, CONTAINER_EXTENSION),
            None => format!("{}-{}.{}", self.host, stamp, CONTAINER_EXTENSION),
        }
    }

    /// Parses a temporary container file name.
    ///
    /// Both `<host>-<stamp>-<token>.zip` and `<host>-<stamp>.zip` are accepted. Host names may
    /// contain dashes, so the name is split from the right.
    pub fn parse(file_name: &str) -> ZipspoolResult<Self> {
        let invalid = || ZipspoolError::InvalidContainerName(file_name.to_string());

        let stem = file_name
            .strip_suffix(CONTAINER_EXTENSION)
            .and_then(|s| s.strip_suffix('.'))
            .ok_or_else(invalid)?;

        let mut parts = stem.rsplitn(3, '-');
        let last = parts.next().ok_or_else(invalid)?;
        let middle = parts.next().ok_or_else(invalid)?;
        let rest = parts.next();

        if let Some(opened_at) = parse_timestamp(last) {
            let host = match rest {
                Some(rest) => format!("{rest}-{middle}"),
                None => middle.to_string(),
            };
            return Ok(Self {
                host,
                opened_at,
                token: None,
            });
        }

        let is_token = last.len() == TOKEN_LEN && last.chars().all(|c| c.is_ascii_hexdigit());
        match (is_token, parse_timestamp(middle), rest) {
            (true, Some(opened_at), Some(host)) if !host.is_empty() => Ok(Self {
                host: host.to_string(),
                opened_at,
                token: Some(last.to_string()),
            }),
            _ => Err(invalid()),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Returns the inbox directory of an archive base.
pub fn inbox_dir(archive_base: &Path) -> PathBuf {
    archive_base.join(INBOX_SUBDIR)
}

/// Returns the lock file path of an archive base.
pub fn lock_path(archive_base: &Path) -> PathBuf {
    inbox_dir(archive_base).join(LOCK_FILENAME)
}

/// Normalizes an entry path written by a producer.
///
/// Rules:
/// - The path must be relative and non-empty
/// - `.` components and redundant separators are dropped
/// - `..` may only cancel a preceding component, never escape the root
///
/// The result is forward-slash separated.
pub fn normalize_relative_path(path: &str) -> ZipspoolResult<String> {
    if path.is_empty() {
        return Err(ZipspoolError::InvalidRelativePath(
            "path cannot be empty".to_string(),
        ));
    }

    let unix = Utf8UnixPathBuf::from(path.replace('\\', "/"));
    let mut normalized: Vec<&str> = Vec::new();

    for component in unix.components() {
        match component {
            Utf8UnixComponent::RootDir => {
                return Err(ZipspoolError::InvalidRelativePath(format!(
                    "path must be relative: {path}"
                )));
            }
            Utf8UnixComponent::ParentDir => {
                if normalized.pop().is_none() {
                    return Err(ZipspoolError::InvalidRelativePath(format!(
                        "path escapes its root: {path}"
                    )));
                }
            }
            Utf8UnixComponent::CurDir => continue,
            Utf8UnixComponent::Normal(c) => {
                if !c.is_empty() {
                    normalized.push(c);
                }
            }
        }
    }

    if normalized.is_empty() {
        return Err(ZipspoolError::InvalidRelativePath(format!(
            "path has no components: {path}"
        )));
    }

    Ok(normalized.join("/"))
}

/// Splits a stored entry name into `(destination, relative path)` on the first `/`.
///
/// Returns `None` when there is no separator or either half is empty.
pub fn split_entry_name(name: &str) -> Option<(&str, &str)> {
    match name.split_once('/') {
        Some((dest, rel)) if !dest.is_empty() && !rel.is_empty() => Some((dest, rel)),
        _ => None,
    }
}

/// Returns the on-disk path of the active destination container named `dest`.
///
/// `.zip` is appended unless the name already carries it.
pub fn destination_path(archive_base: &Path, dest: &str) -> PathBuf {
    let suffix = format!(".{CONTAINER_EXTENSION}");
    if dest.ends_with(&suffix) {
        archive_base.join(dest)
    } else {
        archive_base.join(format!("{dest}{suffix}"))
    }
}

/// Returns the first numbered sibling `<stem>-<index>.<ext>` of `path` that does not exist yet.
pub fn next_free_sibling(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    (0u64..)
        .map(|index| path.with_file_name(format!("{stem}-{index}{ext}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| path.with_extension("overflow"))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
