use std::{
    future::Future,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use chrono::Utc;
use tokio::{
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::SpoolConfig,
    container::ContainerWriter,
    utils::{self, TempContainerName},
    ZipspoolError, ZipspoolResult,
};

use super::{ScopedPickup, ScopedWrite, WriteMode};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Entry point of the writer side.
///
/// A spool buffers producer output into the current temporary container of its inbox and seals
/// that container every rotation span. Start one with [`Spool::start`] and pass the returned
/// [`SpoolHandle`] to producer code, or scope a whole session with [`Spool::run`].
///
/// # Example
///
/// ```no_run
/// use std::io::Write;
///
/// use zipspool::{config::SpoolConfig, spool::{Spool, WriteMode}};
///
/// #[tokio::main]
/// async fn main() -> zipspool::ZipspoolResult<()> {
///     let config = SpoolConfig::builder().archive_base("/mnt/shared/archives").build();
///
///     Spool::run(config, |spool| async move {
///         let mut out = spool.scoped_write("results/run-1/out.bin", WriteMode::Binary)?;
///         out.write_all(b"Hello world")?;
///         out.close()?;
///         zipspool::Ok(())
///     })
///     .await?
/// }
/// ```
pub struct Spool;

/// A cloneable handle to a running spool.
///
/// The spool shuts down when [`SpoolHandle::shutdown`] is called or when the last handle is
/// dropped; either way the open container is sealed.
#[derive(Clone)]
pub struct SpoolHandle {
    inner: Arc<SpoolInner>,
}

struct SpoolInner {
    /// The spool configuration.
    config: SpoolConfig,

    /// Directory receiving the temporary containers.
    inbox: PathBuf,

    /// Host identifier used in container names.
    host: String,

    /// Mutable state shared by committers and the rotation task.
    state: Mutex<SpoolState>,

    /// Stops the rotation task.
    cancel: CancellationToken,

    /// The rotation task.
    rotation_task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Default)]
struct SpoolState {
    /// The container currently receiving commits.
    current: Option<ContainerWriter>,

    /// Set once the spool is shut down.
    closed: bool,

    /// Containers opened so far by this spool.
    opened: u64,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Spool {
    /// Starts a spool and its rotation task.
    ///
    /// The inbox directory is created if needed. No container is opened until the first commit.
    pub async fn start(config: SpoolConfig) -> ZipspoolResult<SpoolHandle> {
        config.validate()?;

        let inbox = utils::inbox_dir(config.get_archive_base());
        tokio::fs::create_dir_all(&inbox).await?;

        let host = utils::host_identifier()?;
        let rotation_span = *config.get_rotation_span();
        let cancel = CancellationToken::new();

        let inner = Arc::new(SpoolInner {
            config,
            inbox,
            host,
            state: Mutex::new(SpoolState::default()),
            cancel: cancel.clone(),
            rotation_task: Mutex::new(None),
        });

        let task = tokio::spawn(rotate_periodically(
            Arc::downgrade(&inner),
            rotation_span,
            cancel,
        ));
        *lock(&inner.rotation_task) = Some(task);

        tracing::info!(
            "spool started for {} (rotation every {:?})",
            inner.inbox.display(),
            rotation_span
        );

        Ok(SpoolHandle { inner })
    }

    /// Runs `f` with a fresh spool and shuts the spool down when `f` completes.
    ///
    /// If the returned future is dropped before completion, the spool still seals its container
    /// once the last handle is gone.
    pub async fn run<F, Fut, T>(config: SpoolConfig, f: F) -> ZipspoolResult<T>
    where
        F: FnOnce(SpoolHandle) -> Fut,
        Fut: Future<Output = T>,
    {
        let handle = Self::start(config).await?;
        let output = f(handle.clone()).await;
        handle.shutdown().await?;

        Ok(output)
    }
}

impl SpoolHandle {
    /// Returns the spool configuration.
    pub fn config(&self) -> &SpoolConfig {
        &self.inner.config
    }

    /// Returns the inbox the spool writes to.
    pub fn inbox(&self) -> &Path {
        &self.inner.inbox
    }

    /// Returns the path of the container currently open, if any.
    pub fn current_container(&self) -> Option<PathBuf> {
        lock(&self.inner.state)
            .current
            .as_ref()
            .map(|c| c.path().to_path_buf())
    }

    /// Returns how many containers this spool has opened.
    pub fn containers_opened(&self) -> u64 {
        lock(&self.inner.state).opened
    }

    /// Returns `true` once the spool has been shut down.
    pub fn is_closed(&self) -> bool {
        lock(&self.inner.state).closed
    }

    /// Commits `content` as an entry named `relative_path`.
    ///
    /// Content is committed if `succeeded` is `true` or the spool is not in success-only mode. A
    /// name already present in the current container is silently discarded.
    ///
    /// Returns `true` if the entry was written.
    ///
    /// ## Errors
    ///
    /// Fails if `relative_path` is not a clean relative path, if the spool is closed or if the
    /// container cannot be written.
    pub fn commit_write(
        &self,
        relative_path: &str,
        content: &[u8],
        succeeded: bool,
    ) -> ZipspoolResult<bool> {
        let name = utils::normalize_relative_path(relative_path)?;
        if !self.should_commit(succeeded) {
            tracing::debug!("discarding {} from a failed write scope", name);
            return Ok(false);
        }

        self.inner.with_current(|container| {
            let written = container.write_entry(&name, content, None)?;
            if !written {
                tracing::debug!("discarding duplicate entry {}", name);
            }
            Ok(written)
        })
    }

    /// Commits the file at `temp_file` as an entry named `relative_path`.
    ///
    /// Follows the same rules as [`SpoolHandle::commit_write`]. The file is deleted afterwards
    /// whether or not it was committed, and also when the commit fails.
    pub fn commit_external_file(
        &self,
        temp_file: impl AsRef<Path>,
        relative_path: &str,
        succeeded: bool,
    ) -> ZipspoolResult<bool> {
        let temp_file = temp_file.as_ref();
        let result = self.commit_external_file_inner(temp_file, relative_path, succeeded);
        remove_picked_up(temp_file);

        result
    }

    fn commit_external_file_inner(
        &self,
        temp_file: &Path,
        relative_path: &str,
        succeeded: bool,
    ) -> ZipspoolResult<bool> {
        let name = utils::normalize_relative_path(relative_path)?;
        if !self.should_commit(succeeded) {
            tracing::debug!("discarding {} from a failed pickup scope", name);
            return Ok(false);
        }

        self.inner.with_current(|container| {
            let written = container.write_file(&name, temp_file)?;
            if !written {
                tracing::debug!("discarding duplicate entry {}", name);
            }
            Ok(written)
        })
    }

    /// Opens a buffer that is committed as `relative_path` when its scope ends.
    ///
    /// See [`ScopedWrite`] for the commit rules.
    pub fn scoped_write(&self, relative_path: &str, mode: WriteMode) -> ZipspoolResult<ScopedWrite> {
        let name = utils::normalize_relative_path(relative_path)?;
        Ok(ScopedWrite::new(self.clone(), name, mode))
    }

    /// Opens a scope around an external file that is committed as `relative_path` when the scope
    /// ends.
    ///
    /// See [`ScopedPickup`] for the commit rules. If `relative_path` is rejected, `temp_file` is
    /// deleted right away.
    pub fn scoped_external_pickup(
        &self,
        temp_file: impl Into<PathBuf>,
        relative_path: &str,
    ) -> ZipspoolResult<ScopedPickup> {
        let temp_file = temp_file.into();
        match utils::normalize_relative_path(relative_path) {
            Ok(name) => Ok(ScopedPickup::new(self.clone(), temp_file, name)),
            Err(e) => {
                remove_picked_up(&temp_file);
                Err(e)
            }
        }
    }

    /// Seals the current container now. The next commit opens a new one.
    pub fn rotate(&self) -> ZipspoolResult<()> {
        self.inner.seal_current()
    }

    /// Shuts the spool down: seals the current container and stops the rotation task.
    ///
    /// Later commits fail with [`ZipspoolError::SpoolClosed`].
    pub async fn shutdown(&self) -> ZipspoolResult<()> {
        let sealed = {
            let mut state = lock(&self.inner.state);
            state.closed = true;
            state.current.take()
        };

        self.inner.cancel.cancel();
        let task = lock(&self.inner.rotation_task).take();
        if let Some(task) = task {
            task.await?;
        }

        if let Some(container) = sealed {
            let path = container.path().to_path_buf();
            container.finish()?;
            tracing::info!("sealed temporary container {}", path.display());
        }

        tracing::info!("spool for {} shut down", self.inner.inbox.display());
        Ok(())
    }

    fn should_commit(&self, succeeded: bool) -> bool {
        succeeded || !*self.inner.config.get_success_only()
    }
}

impl SpoolInner {
    /// Runs `f` on the current container, opening one first if none is open.
    fn with_current<T>(
        &self,
        f: impl FnOnce(&mut ContainerWriter) -> ZipspoolResult<T>,
    ) -> ZipspoolResult<T> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(ZipspoolError::SpoolClosed);
        }

        if state.current.is_none() {
            let name = TempContainerName::generate(self.host.clone(), Utc::now());
            let path = self.inbox.join(name.file_name());
            let container = ContainerWriter::create(&path)?;
            tracing::info!("opened temporary container {}", path.display());

            state.current = Some(container);
            state.opened += 1;
        }

        match state.current.as_mut() {
            Some(container) => f(container),
            None => Err(ZipspoolError::SpoolClosed),
        }
    }

    fn seal_current(&self) -> ZipspoolResult<()> {
        let current = lock(&self.state).current.take();
        if let Some(container) = current {
            let path = container.path().to_path_buf();
            container.finish()?;
            tracing::info!("sealed temporary container {}", path.display());
        }

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn remove_picked_up(temp_file: &Path) {
    match std::fs::remove_file(temp_file) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("failed to remove picked up file {}: {}", temp_file.display(), e),
    }
}

/// Seals the spool's container every `span` until cancelled or the spool is gone.
async fn rotate_periodically(inner: Weak<SpoolInner>, span: Duration, cancel: CancellationToken) {
    let mut ticker = time::interval_at(Instant::now() + span, span);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };

                if let Err(e) = inner.seal_current() {
                    tracing::error!("failed to rotate temporary container: {}", e);
                }
            }
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Drop for SpoolInner {
    fn drop(&mut self) {
        self.cancel.cancel();

        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        state.closed = true;
        if let Some(container) = state.current.take() {
            let path = container.path().to_path_buf();
            match container.finish() {
                Ok(()) => tracing::info!("sealed temporary container {}", path.display()),
                Err(e) => tracing::error!("failed to seal {}: {}", path.display(), e),
            }
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

    fn config(base: &Path, success_only: bool) -> SpoolConfig {
        SpoolConfig::builder()
            .archive_base(base)
            .rotation_span(Duration::from_secs(3600))
            .success_only(success_only)
            .build()
    }

    fn inbox_containers(base: &Path) -> Vec<PathBuf> {
        let mut paths: Vec<_> = std::fs::read_dir(utils::inbox_dir(base))
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().is_some_and(|e| e == "zip"))
            .collect();
        paths.sort();
        paths
    }

    #[test_log::test(tokio::test)]
    async fn test_container_opened_lazily() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let spool = Spool::start(config(dir.path(), true)).await?;

        assert!(spool.current_container().is_none());
        assert!(inbox_containers(dir.path()).is_empty());

        spool.commit_write("a/b/c.txt", b"Lorem ipsum", true)?;
        let current = spool.current_container().expect("container opened");
        let name = current.file_name().unwrap().to_string_lossy().into_owned();
        assert!(TempContainerName::parse(&name).is_ok());

        spool.shutdown().await?;
        assert_eq!(inbox_containers(dir.path()), vec![current]);

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_duplicates_and_failed_scopes() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let spool = Spool::start(config(dir.path(), true)).await?;

        assert!(spool.commit_write("a/x", b"first", true)?);
        assert!(!spool.commit_write("a/x", b"second", true)?);
        assert!(!spool.commit_write("a/y", b"failed", false)?);
        assert!(matches!(
            spool.commit_write("/a/abs", b"nope", true),
            Err(ZipspoolError::InvalidRelativePath(_))
        ));
        spool.shutdown().await?;

        let containers = inbox_containers(dir.path());
        let mut reader = ContainerReader::open(&containers[0])?;
        assert_eq!(reader.entries()?.len(), 1);
        assert_eq!(reader.read_by_name("a/x")?, Some(b"first".to_vec()));

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_best_effort_commits_failed_scopes() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let spool = Spool::start(config(dir.path(), false)).await?;

        assert!(spool.commit_write("a/y", b"partial", false)?);
        spool.shutdown().await?;

        let containers = inbox_containers(dir.path());
        let mut reader = ContainerReader::open(&containers[0])?;
        assert_eq!(reader.read_by_name("a/y")?, Some(b"partial".to_vec()));

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_external_file_always_deleted() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let spool = Spool::start(config(dir.path(), true)).await?;

        let committed = dir.path().join("ok.txt");
        let discarded = dir.path().join("failed.txt");
        std::fs::write(&committed, b"dolor sit amet")?;
        std::fs::write(&discarded, b"never stored")?;

        assert!(spool.commit_external_file(&committed, "a/ok.txt", true)?);
        assert!(!spool.commit_external_file(&discarded, "a/failed.txt", false)?);
        assert!(!committed.exists());
        assert!(!discarded.exists());

        spool.shutdown().await?;
        let containers = inbox_containers(dir.path());
        let mut reader = ContainerReader::open(&containers[0])?;
        assert_eq!(reader.read_by_name("a/ok.txt")?, Some(b"dolor sit amet".to_vec()));
        assert!(!reader.contains("a/failed.txt"));

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_rejected_pickup_still_deletes_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let spool = Spool::start(config(&dir.path().join("base"), true)).await?;

        let temp = dir.path().join("out.tmp");
        std::fs::write(&temp, b"produced")?;

        assert!(matches!(
            spool.scoped_external_pickup(&temp, "../escape.txt"),
            Err(ZipspoolError::InvalidRelativePath(_))
        ));
        assert!(!temp.exists());

        spool.shutdown().await?;
        assert_eq!(spool.containers_opened(), 0);

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_rotation_opens_new_container() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let spool = Spool::start(config(dir.path(), true)).await?;

        spool.commit_write("a/1", b"one", true)?;
        let first = spool.current_container().unwrap();
        spool.rotate()?;
        assert!(spool.current_container().is_none());

        // A duplicate name is accepted again in the next container.
        spool.commit_write("a/1", b"again", true)?;
        let second = spool.current_container().unwrap();
        assert_ne!(first, second);
        assert_eq!(spool.containers_opened(), 2);

        spool.shutdown().await?;
        assert_eq!(inbox_containers(dir.path()).len(), 2);

        Ok(())
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_timer_seals_container() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let spool = Spool::start(
            SpoolConfig::builder()
                .archive_base(dir.path())
                .rotation_span(Duration::from_secs(300))
                .build(),
        )
        .await?;

        spool.commit_write("a/1", b"one", true)?;
        assert!(spool.current_container().is_some());

        time::sleep(Duration::from_secs(301)).await;
        assert!(spool.current_container().is_none());

        spool.shutdown().await?;
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_closed_spool_rejects_commits() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let spool = Spool::start(config(dir.path(), true)).await?;
        spool.shutdown().await?;

        assert!(spool.is_closed());
        assert!(matches!(
            spool.commit_write("a/late", b"late", true),
            Err(ZipspoolError::SpoolClosed)
        ));

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_dropping_last_handle_seals() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let spool = Spool::start(config(dir.path(), true)).await?;
        spool.commit_write("a/1", b"one", true)?;
        let path = spool.current_container().unwrap();
        drop(spool);

        assert!(crate::container::is_valid_container(&path));
        Ok(())
    }
}
