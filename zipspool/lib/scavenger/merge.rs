use std::{
    collections::{hash_map::Entry, HashMap},
    fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::{DateTime, Utc};

use crate::{
    config::{ScavengerConfig, MERGE_GRACE_FACTOR},
    container::{ContainerReader, ContainerWriter, Repairer},
    utils::{self, TempContainerName, CONTAINER_EXTENSION},
    ZipspoolError, ZipspoolResult,
};

use super::Scavenger;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Counters describing one merge pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    /// Entries appended to destination containers.
    pub files_copied: u64,

    /// Temporary containers merged and deleted.
    pub temp_containers: u64,

    /// Destination containers opened for append.
    pub dest_containers: u64,

    /// Entries discarded because their name already existed at the destination.
    pub duplicates: u64,

    /// Entries skipped because their bytes could not be read.
    pub read_faults: u64,

    /// Entries skipped because their name has no destination part.
    pub malformed: u64,
}

/// A temporary container found in the inbox.
#[derive(Debug)]
struct Candidate {
    path: PathBuf,
    name: TempContainerName,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Scavenger {
    /// Runs one merge pass over the inbox as of `now`.
    ///
    /// Temporary containers older than 1.5 rotation spans (any age if `force`) are merged oldest
    /// first into their destination containers. A merged temporary container is deleted only
    /// after every destination container of the pass has been sealed and synced, so a pass that
    /// dies midway leaves its input in the inbox and the next pass redoes it. The caller is
    /// responsible for holding the inbox lock; see [`Scavenger::try_scan`].
    ///
    /// ## Errors
    ///
    /// Fails with [`ZipspoolError::RepairFailed`] when a container cannot be repaired. The pass
    /// stops there; containers not fully merged yet stay in the inbox for the next pass. All
    /// destination containers opened so far are sealed before the error is returned.
    pub fn run_pass(&self, now: DateTime<Utc>, force: bool) -> ZipspoolResult<MergeStats> {
        let inbox = utils::inbox_dir(self.config.get_archive_base());
        fs::create_dir_all(&inbox)?;

        let mut stats = MergeStats::default();
        let mut destinations = HashMap::new();
        let mut merged = Vec::new();

        let result = self
            .eligible_containers(&inbox, now, force)
            .and_then(|candidates| {
                for candidate in &candidates {
                    self.merge_container(candidate, &mut destinations, &mut stats)
                        .inspect_err(log_stall)?;
                    merged.push(candidate.path.clone());
                }
                Ok(())
            });

        let sealed = seal_destinations(destinations);
        if sealed.is_ok() {
            for path in &merged {
                fs::remove_file(path)?;
                stats.temp_containers += 1;
            }
        }

        result?;
        sealed?;

        if stats.files_copied > 0 {
            tracing::info!("{}", stats);
        }

        Ok(stats)
    }

    /// Lists the temporary containers old enough to merge, oldest first.
    fn eligible_containers(
        &self,
        inbox: &Path,
        now: DateTime<Utc>,
        force: bool,
    ) -> ZipspoolResult<Vec<Candidate>> {
        let grace = self.config.get_rotation_span().mul_f64(MERGE_GRACE_FACTOR);
        let mut candidates = Vec::new();

        for dir_entry in fs::read_dir(inbox)? {
            let path = dir_entry?.path();
            if !path.is_file() || path.extension().is_none_or(|e| e != CONTAINER_EXTENSION) {
                continue;
            }

            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let name = match TempContainerName::parse(&file_name) {
                Ok(name) => name,
                Err(e) => {
                    tracing::debug!("leaving {} alone: {}", path.display(), e);
                    continue;
                }
            };

            let age = (now - name.opened_at).to_std().unwrap_or(Duration::ZERO);
            if !force && age < grace {
                tracing::debug!("{} is too young to merge ({:?})", file_name, age);
                continue;
            }

            candidates.push(Candidate { path, name });
        }

        candidates.sort_by(|a, b| {
            a.name
                .opened_at
                .cmp(&b.name.opened_at)
                .then_with(|| a.path.cmp(&b.path))
        });

        Ok(candidates)
    }

    /// Appends every entry of one temporary container to its destination container.
    ///
    /// The temporary container itself is left in place; [`Scavenger::run_pass`] deletes it once
    /// the destinations are sealed.
    fn merge_container(
        &self,
        candidate: &Candidate,
        destinations: &mut HashMap<String, ContainerWriter>,
        stats: &mut MergeStats,
    ) -> ZipspoolResult<()> {
        let path = &candidate.path;
        self.repairer.ensure_valid(path)?;

        let mut reader = ContainerReader::open(path)?;
        if reader.is_empty() {
            tracing::debug!("{} has no entries", reader.path().display());
        } else {
            tracing::debug!(
                "merging {} ({} entries) from {}",
                reader.path().display(),
                reader.len(),
                candidate.name.host
            );
        }

        for entry in reader.entries()? {
            let Some((dest, relative_path)) = utils::split_entry_name(&entry.name) else {
                tracing::warn!(
                    "skipping {:?} in {}: no destination in entry name",
                    entry.name,
                    path.display()
                );
                stats.malformed += 1;
                continue;
            };

            let writer = match destinations.entry(dest.to_string()) {
                Entry::Occupied(occupied) => occupied.into_mut(),
                Entry::Vacant(vacant) => {
                    let writer = open_destination(&self.config, &self.repairer, dest)?;
                    stats.dest_containers += 1;
                    vacant.insert(writer)
                }
            };

            if writer.contains(relative_path) {
                tracing::debug!("discarding duplicate {} for {}", relative_path, dest);
                stats.duplicates += 1;
                continue;
            }

            let bytes = match reader.read_entry(&entry) {
                Ok(bytes) => bytes,
                Err(e @ ZipspoolError::ReadFault { .. }) => {
                    tracing::error!("{}", e);
                    stats.read_faults += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            writer.write_entry(relative_path, &bytes, entry.last_modified)?;
            stats.files_copied += 1;
        }

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Seals every destination container, returning the first error after trying all of them.
fn seal_destinations(destinations: HashMap<String, ContainerWriter>) -> ZipspoolResult<()> {
    let mut sealed = Ok(());
    for (dest, writer) in destinations {
        let path = writer.path().to_path_buf();
        let entries = writer.entry_count();
        match writer.finish() {
            Ok(()) => tracing::debug!("sealed {} with {} entries", path.display(), entries),
            Err(e) => {
                tracing::error!("failed to seal destination {}: {}", dest, e);
                if sealed.is_ok() {
                    sealed = Err(e);
                }
            }
        }
    }

    sealed
}

/// Containers are merged oldest first, so one that cannot be repaired holds back every later one.
fn log_stall(error: &ZipspoolError) {
    if let ZipspoolError::RepairFailed { path, .. } = error {
        tracing::error!(
            "merging is stalled on {}: repair it by hand or move it out of the archive base",
            path.display()
        );
    }
}

/// Opens the active destination container named `dest` for append.
///
/// An existing container is repaired if it does not parse, and moved to the first free numbered
/// sibling if it has reached the size cap. The size is only checked here, once per pass.
fn open_destination(
    config: &ScavengerConfig,
    repairer: &Repairer,
    dest: &str,
) -> ZipspoolResult<ContainerWriter> {
    let path = utils::destination_path(config.get_archive_base(), dest);

    if path.exists() {
        repairer.ensure_valid(&path)?;

        let size = fs::metadata(&path)?.len();
        if size >= *config.get_size_cap() {
            let sibling = utils::next_free_sibling(&path);
            fs::rename(&path, &sibling)?;
            tracing::info!(
                "rotated {} ({} bytes) to {}",
                path.display(),
                size,
                sibling.display()
            );
        }
    }

    ContainerWriter::open_for_append(&path)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for MergeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "transferred {} files from {} temp containers to {} destination containers",
            self.files_copied, self.temp_containers, self.dest_containers
        )
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
