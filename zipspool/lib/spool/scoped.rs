use std::{
    fmt, io,
    path::{Path, PathBuf},
};

use crate::ZipspoolResult;

use super::SpoolHandle;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The kind of content a [`ScopedWrite`] buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Raw bytes, written through [`std::io::Write`].
    Binary,

    /// UTF-8 text, written through [`std::fmt::Write`].
    Text,
}

/// An in-memory buffer committed to the spool when its scope ends.
///
/// Calling [`ScopedWrite::close`] ends the scope successfully and commits the buffer. Dropping
/// the buffer without closing it, e.g. when the producer bails out with `?` or panics, ends the
/// scope abnormally: the buffer is then committed only if the spool is not in success-only mode.
///
/// A binary buffer rejects text writes and a text buffer rejects byte writes.
pub struct ScopedWrite {
    /// The spool to commit to.
    spool: SpoolHandle,

    /// The normalized entry name.
    relative_path: String,

    /// The accepted kind of content.
    mode: WriteMode,

    /// The buffered content.
    buffer: Vec<u8>,

    /// Set once the scope has ended.
    done: bool,
}

/// A scope around an external file that is committed to the spool when the scope ends.
///
/// The producer materializes its output at [`ScopedPickup::temp_file`]. [`ScopedPickup::close`]
/// commits it; dropping the scope without closing commits only if the spool is not in
/// success-only mode. The file is deleted in every case.
pub struct ScopedPickup {
    /// The spool to commit to.
    spool: SpoolHandle,

    /// The external file.
    temp_file: PathBuf,

    /// The normalized entry name.
    relative_path: String,

    /// Set once the scope has ended.
    done: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ScopedWrite {
    pub(super) fn new(spool: SpoolHandle, relative_path: String, mode: WriteMode) -> Self {
        Self {
            spool,
            relative_path,
            mode,
            buffer: Vec::new(),
            done: false,
        }
    }

    /// Returns the entry name the buffer is committed as.
    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    /// Returns the kind of content the buffer accepts.
    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    /// Returns the content buffered so far.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Ends the scope successfully and commits the buffer.
    ///
    /// Returns `true` if the entry was written, `false` if its name was already taken in the
    /// current container.
    pub fn close(mut self) -> ZipspoolResult<bool> {
        self.end(true)
    }

    /// Ends the scope as failed. Same as dropping the buffer, but reports commit errors.
    pub fn fail(mut self) -> ZipspoolResult<bool> {
        self.end(false)
    }

    fn end(&mut self, succeeded: bool) -> ZipspoolResult<bool> {
        self.done = true;
        let buffer = std::mem::take(&mut self.buffer);
        self.spool
            .commit_write(&self.relative_path, &buffer, succeeded)
    }
}

impl ScopedPickup {
    pub(super) fn new(spool: SpoolHandle, temp_file: PathBuf, relative_path: String) -> Self {
        Self {
            spool,
            temp_file,
            relative_path,
            done: false,
        }
    }

    /// Returns the path the producer writes its output to.
    pub fn temp_file(&self) -> &Path {
        &self.temp_file
    }

    /// Returns the entry name the file is committed as.
    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    /// Ends the scope successfully, commits the file and deletes it.
    pub fn close(mut self) -> ZipspoolResult<bool> {
        self.end(true)
    }

    /// Ends the scope as failed. Same as dropping the scope, but reports commit errors.
    pub fn fail(mut self) -> ZipspoolResult<bool> {
        self.end(false)
    }

    fn end(&mut self, succeeded: bool) -> ZipspoolResult<bool> {
        self.done = true;
        self.spool
            .commit_external_file(&self.temp_file, &self.relative_path, succeeded)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl io::Write for ScopedWrite {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.mode != WriteMode::Binary {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "text buffer only accepts str writes",
            ));
        }

        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Write for ScopedWrite {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.mode != WriteMode::Text {
            return Err(fmt::Error);
        }

        self.buffer.extend_from_slice(s.as_bytes());
        Ok(())
    }
}

impl Drop for ScopedWrite {
    fn drop(&mut self) {
        if self.done {
            return;
        }

        if let Err(e) = self.end(false) {
            tracing::error!("failed to commit {}: {}", self.relative_path, e);
        }
    }
}

impl Drop for ScopedPickup {
    fn drop(&mut self) {
        if self.done {
            return;
        }

        if let Err(e) = self.end(false) {
            tracing::error!(
                "failed to commit picked up file {} as {}: {}",
                self.temp_file.display(),
                self.relative_path,
                e
            );
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
