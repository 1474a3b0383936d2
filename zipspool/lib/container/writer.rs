use std::{
    collections::HashSet,
    fs::{File, OpenOptions},
    io::{self, BufReader, Write},
    path::{Path, PathBuf},
};

use zip::{write::SimpleFileOptions, CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::ZipspoolResult;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Entries at or above this size need zip64 extra fields.
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A container opened for writing.
///
/// Names already present, whether from a previous session or written through this writer, are
/// tracked so that the first write of a name wins and later ones are discarded.
///
/// The container is sealed by [`ContainerWriter::finish`]. Dropping an unfinished writer seals it
/// as well, logging any error.
pub struct ContainerWriter {
    /// Path of the container on disk.
    path: PathBuf,

    /// The zip writer; `None` once sealed.
    writer: Option<ZipWriter<File>>,

    /// Every entry name present in the container.
    names: HashSet<String>,

    /// Compression applied to new entries.
    compression: CompressionMethod,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ContainerWriter {
    /// Creates a new, empty container at `path`.
    ///
    /// Fails if a file already exists there; containers are never clobbered.
    pub fn create(path: impl AsRef<Path>) -> ZipspoolResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;

        tracing::debug!("created container {}", path.display());

        Ok(Self {
            path,
            writer: Some(ZipWriter::new(file)),
            names: HashSet::new(),
            compression: CompressionMethod::Deflated,
        })
    }

    /// Opens the container at `path` for appending, creating it if it does not exist.
    pub fn open_for_append(path: impl AsRef<Path>) -> ZipspoolResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Self::create(path);
        }

        let names = {
            let archive = ZipArchive::new(BufReader::new(File::open(path)?))?;
            archive.file_names().map(str::to_string).collect()
        };

        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let writer = ZipWriter::new_append(file)?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(writer),
            names,
            compression: CompressionMethod::Deflated,
        })
    }

    /// Sets the compression method for entries written from now on.
    pub fn with_compression(mut self, compression: CompressionMethod) -> Self {
        self.compression = compression;
        self
    }

    /// Returns the path of the container.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `true` if an entry named `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Returns the number of entries in the container.
    pub fn entry_count(&self) -> usize {
        self.names.len()
    }

    /// Writes `bytes` as an entry named `name`.
    ///
    /// Returns `false` without writing anything if the name already exists.
    pub fn write_entry(
        &mut self,
        name: &str,
        bytes: &[u8],
        last_modified: Option<DateTime>,
    ) -> ZipspoolResult<bool> {
        if self.contains(name) {
            return Ok(false);
        }

        let options = self.options(bytes.len() as u64, last_modified);
        let writer = self.writer()?;
        writer.start_file(name, options)?;
        writer.write_all(bytes)?;

        self.names.insert(name.to_string());
        Ok(true)
    }

    /// Streams the file at `source` into an entry named `name`.
    ///
    /// Returns `false` without reading the file if the name already exists.
    pub fn write_file(&mut self, name: &str, source: impl AsRef<Path>) -> ZipspoolResult<bool> {
        if self.contains(name) {
            return Ok(false);
        }

        let mut input = File::open(source.as_ref())?;
        let size = input.metadata()?.len();

        let options = self.options(size, None);
        let writer = self.writer()?;
        writer.start_file(name, options)?;
        io::copy(&mut input, writer)?;

        self.names.insert(name.to_string());
        Ok(true)
    }

    /// Seals the container by writing its central directory.
    pub fn finish(mut self) -> ZipspoolResult<()> {
        self.seal()
    }

    fn seal(&mut self) -> ZipspoolResult<()> {
        if let Some(writer) = self.writer.take() {
            let mut file = writer.finish()?;
            file.flush()?;
            file.sync_all()?;
            tracing::debug!(
                "sealed container {} with {} entries",
                self.path.display(),
                self.names.len()
            );
        }

        Ok(())
    }

    fn writer(&mut self) -> ZipspoolResult<&mut ZipWriter<File>> {
        self.writer.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, "container already sealed").into()
        })
    }

    fn options(&self, size: u64, last_modified: Option<DateTime>) -> SimpleFileOptions {
        let options = SimpleFileOptions::default()
            .compression_method(self.compression)
            .large_file(size >= ZIP64_THRESHOLD);

        match last_modified {
            Some(time) => options.last_modified_time(time),
            None => options,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Drop for ContainerWriter {
    fn drop(&mut self) {
        if let Err(e) = self.seal() {
            tracing::error!("failed to seal container {}: {}", self.path.display(), e);
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerReader;

    #[test]
    fn test_first_write_wins() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("c.zip");

        let mut writer = ContainerWriter::create(&path)?;
        assert!(writer.write_entry("x", b"one", None)?);
        assert!(!writer.write_entry("x", b"two", None)?);
        assert_eq!(writer.entry_count(), 1);
        writer.finish()?;

        let mut reader = ContainerReader::open(&path)?;
        assert_eq!(reader.read_by_name("x")?, Some(b"one".to_vec()));

        Ok(())
    }

    #[test]
    fn test_append_keeps_existing_entries() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("c.zip");

        let mut writer = ContainerWriter::open_for_append(&path)?;
        writer.write_entry("old", b"kept", None)?;
        writer.finish()?;

        let mut writer = ContainerWriter::open_for_append(&path)?;
        assert!(writer.contains("old"));
        assert!(!writer.write_entry("old", b"replaced", None)?);
        assert!(writer.write_entry("new", b"added", None)?);
        writer.finish()?;

        let mut reader = ContainerReader::open(&path)?;
        assert_eq!(reader.entries()?.len(), 2);
        assert_eq!(reader.read_by_name("old")?, Some(b"kept".to_vec()));
        assert_eq!(reader.read_by_name("new")?, Some(b"added".to_vec()));

        Ok(())
    }

    #[test]
    fn test_create_refuses_existing_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("c.zip");
        std::fs::write(&path, b"occupied")?;

        assert!(ContainerWriter::create(&path).is_err());
        assert_eq!(std::fs::read(&path)?, b"occupied");

        Ok(())
    }

    #[test]
    fn test_write_file_and_drop_seals() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("c.zip");
        let source = dir.path().join("external.txt");
        std::fs::write(&source, b"dolor sit amet")?;

        {
            let mut writer = ContainerWriter::create(&path)?;
            assert!(writer.write_file("a/e.txt", &source)?);
        }

        let mut reader = ContainerReader::open(&path)?;
        assert_eq!(reader.read_by_name("a/e.txt")?, Some(b"dolor sit amet".to_vec()));

        Ok(())
    }
}
