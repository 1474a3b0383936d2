use std::{
    fs::File,
    io::{self, BufReader, Read},
    path::{Path, PathBuf},
};

use zip::{DateTime, ZipArchive};

use crate::{ZipspoolError, ZipspoolResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A container opened for reading.
pub struct ContainerReader {
    /// Path of the container on disk.
    path: PathBuf,

    /// The parsed archive.
    archive: ZipArchive<BufReader<File>>,
}

/// An entry listed from a [`ContainerReader`].
#[derive(Debug, Clone)]
pub struct EntryInfo {
    /// The stored name of the entry.
    pub name: String,

    /// The uncompressed size in bytes.
    pub size: u64,

    /// Position of the entry in the central directory.
    pub index: usize,

    /// The modification time recorded for the entry.
    pub last_modified: Option<DateTime>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ContainerReader {
    /// Opens the container at `path` for reading.
    pub fn open(path: impl AsRef<Path>) -> ZipspoolResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let archive = ZipArchive::new(BufReader::new(file))?;

        Ok(Self { path, archive })
    }

    /// Returns the path of the container.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of entries, directories included.
    pub fn len(&self) -> usize {
        self.archive.len()
    }

    /// Returns `true` if the container has no entries.
    pub fn is_empty(&self) -> bool {
        self.archive.len() == 0
    }

    /// Returns `true` if an entry named `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.archive.index_for_name(name).is_some()
    }

    /// Lists the file entries of the container. Directory entries are left out.
    pub fn entries(&mut self) -> ZipspoolResult<Vec<EntryInfo>> {
        let mut entries = Vec::with_capacity(self.archive.len());
        for index in 0..self.archive.len() {
            let file = self.archive.by_index_raw(index)?;
            if file.is_dir() {
                continue;
            }

            entries.push(EntryInfo {
                name: file.name().to_string(),
                size: file.size(),
                index,
                last_modified: file.last_modified(),
            });
        }

        Ok(entries)
    }

    /// Reads the bytes of `entry`.
    ///
    /// ## Errors
    ///
    /// Fails with [`ZipspoolError::ReadFault`] when the entry cannot be decoded, e.g. on a checksum
    /// mismatch, truncated data or an unsupported compression method.
    pub fn read_entry(&mut self, entry: &EntryInfo) -> ZipspoolResult<Vec<u8>> {
        let fault = |source: io::Error| ZipspoolError::ReadFault {
            container: self.path.clone(),
            entry: entry.name.clone(),
            source,
        };

        let mut file = match self.archive.by_index(entry.index) {
            Ok(file) => file,
            Err(e) => return Err(fault(io::Error::other(e))),
        };

        let mut bytes = Vec::with_capacity(entry.size.min(64 * 1024 * 1024) as usize);
        if let Err(e) = file.read_to_end(&mut bytes) {
            return Err(fault(e));
        }

        Ok(bytes)
    }

    /// Reads the entry named `name`, if present.
    pub fn read_by_name(&mut self, name: &str) -> ZipspoolResult<Option<Vec<u8>>> {
        let Some(index) = self.archive.index_for_name(name) else {
            return Ok(None);
        };

        let entry = self
            .entries()?
            .into_iter()
            .find(|e| e.index == index)
            .ok_or_else(|| ZipspoolError::custom(anyhow::anyhow!("{name} is a directory")))?;

        self.read_entry(&entry).map(Some)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns `true` if `path` is a readable zip container.
pub fn is_valid_container(path: impl AsRef<Path>) -> bool {
    match File::open(path.as_ref()) {
        Ok(file) => ZipArchive::new(BufReader::new(file)).is_ok(),
        Err(_) => false,
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use zip::CompressionMethod;

    use super::*;
    use crate::container::ContainerWriter;

    #[test]
    fn test_list_and_read_entries() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("c.zip");

        let mut writer = ContainerWriter::create(&path)?;
        writer.write_entry("a/one.txt", b"first", None)?;
        writer.write_entry("a/two.txt", b"second entry", None)?;
        writer.finish()?;

        let mut reader = ContainerReader::open(&path)?;
        let entries = reader.entries()?;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a/one.txt");
        assert_eq!(entries[1].size, 12);
        assert!(reader.contains("a/two.txt"));
        assert!(!reader.contains("a/three.txt"));

        assert_eq!(reader.read_entry(&entries[1])?, b"second entry");
        assert_eq!(reader.read_by_name("a/one.txt")?, Some(b"first".to_vec()));
        assert_eq!(reader.read_by_name("missing")?, None);

        Ok(())
    }

    #[test]
    fn test_is_valid_container() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let good = dir.path().join("good.zip");
        let bad = dir.path().join("bad.zip");

        ContainerWriter::create(&good)?.finish()?;
        std::fs::write(&bad, b"definitely not a zip file")?;

        assert!(is_valid_container(&good));
        assert!(!is_valid_container(&bad));
        assert!(!is_valid_container(dir.path().join("missing.zip")));

        Ok(())
    }

    #[test]
    fn test_read_fault_on_corrupt_entry() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("c.zip");

        let payload = b"AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";
        let mut writer = ContainerWriter::create(&path)?.with_compression(CompressionMethod::Stored);
        writer.write_entry("d/x.txt", payload, None)?;
        writer.finish()?;

        // Flip the stored payload so the central directory still parses but the CRC does not match.
        let mut raw = std::fs::read(&path)?;
        let at = raw
            .windows(payload.len())
            .position(|w| w == payload)
            .expect("payload stored uncompressed");
        raw[at] = b'B';
        std::fs::write(&path, raw)?;

        let mut reader = ContainerReader::open(&path)?;
        let entries = reader.entries()?;
        assert!(matches!(
            reader.read_entry(&entries[0]),
            Err(ZipspoolError::ReadFault { entry, .. }) if entry == "d/x.txt"
        ));

        Ok(())
    }
}
