use std::{
    ffi::OsString,
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use crate::{config::DEFAULT_REPAIR_PROGRAM, ZipspoolError, ZipspoolResult};

use super::is_valid_container;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Suffix of the scratch file the repair tool writes to.
const FIXED_SUFFIX: &str = "fixed";

/// Answers fed to the repair tool; `zip -FF` asks whether the archive is a single-disk archive.
const CONFIRMATIONS: &[u8] = b"y\ny\ny\ny\ny\ny\ny\ny\n";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Repairs corrupt containers with an external `zip -FF` style tool.
#[derive(Debug, Clone)]
pub struct Repairer {
    /// The program to run, optionally followed by leading arguments separated by whitespace.
    program: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Repairer {
    /// Creates a repairer that runs `program`, e.g. `zip` or `/usr/bin/zip -q`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Rewrites the container at `path` in place.
    ///
    /// The tool writes a fixed copy next to the container, which then replaces the original with a
    /// rename. The original is left untouched if the tool fails.
    ///
    /// ## Errors
    ///
    /// Fails with [`ZipspoolError::RepairFailed`] if the tool cannot be started, exits with a
    /// non-zero status or produces no output.
    pub fn repair(&self, path: &Path) -> ZipspoolResult<()> {
        let fixed = sibling_with_suffix(path, FIXED_SUFFIX);
        let _ = fs::remove_file(&fixed);

        tracing::warn!("repairing container {}", path.display());

        let mut words = self.program.split_whitespace();
        let program = words
            .next()
            .ok_or_else(|| ZipspoolError::repair_failed(path, "repair program is empty"))?;

        let mut child = Command::new(program)
            .args(words)
            .arg("-FF")
            .arg(path)
            .arg("--out")
            .arg(&fixed)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                ZipspoolError::repair_failed(path, format!("cannot run {}: {}", self.program, e))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(CONFIRMATIONS) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {}
                Err(e) => tracing::debug!("failed to answer repair prompts: {}", e),
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|e| ZipspoolError::repair_failed(path, e.to_string()))?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            tracing::debug!("[{}] {}", self.program, line);
        }
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            tracing::debug!("[{} stderr] {}", self.program, line);
        }

        if !output.status.success() {
            let _ = fs::remove_file(&fixed);
            return Err(ZipspoolError::repair_failed(
                path,
                format!("{} exited with {}", self.program, output.status),
            ));
        }

        if !fixed.exists() {
            return Err(ZipspoolError::repair_failed(
                path,
                format!("{} produced no output", self.program),
            ));
        }

        fs::rename(&fixed, path).map_err(|e| ZipspoolError::repair_failed(path, e.to_string()))?;
        tracing::info!("fixed container {}", path.display());

        Ok(())
    }

    /// Makes sure the container at `path` parses, repairing it once if it does not.
    ///
    /// ## Errors
    ///
    /// Fails with [`ZipspoolError::RepairFailed`] if the repair fails or the container still does
    /// not parse afterwards.
    pub fn ensure_valid(&self, path: &Path) -> ZipspoolResult<()> {
        if is_valid_container(path) {
            return Ok(());
        }

        self.repair(path)?;

        if !is_valid_container(path) {
            return Err(ZipspoolError::repair_failed(
                path,
                "container is still unreadable after repair",
            ));
        }

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns `path` with `.suffix` appended to its file name.
fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(OsString::new);
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for Repairer {
    fn default() -> Self {
        Self::new(DEFAULT_REPAIR_PROGRAM)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
