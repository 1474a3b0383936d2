use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    task::{JoinError, JoinHandle},
    time,
};
use tokio_util::sync::CancellationToken;

use crate::{config::ScavengerConfig, ZipspoolResult};

use super::{ScanOutcome, Scavenger};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Runs [`Scavenger::try_scan`] once per rotation span until shut down.
///
/// Each pass runs on the blocking thread pool. When the daemon is shut down while a pass is in
/// flight, the pass gets up to the configured shutdown grace to finish before it is abandoned.
pub struct ScavengerDaemon {
    /// Stops the scan loop.
    cancel: CancellationToken,

    /// The scan loop.
    task: JoinHandle<()>,

    /// Number of scan attempts finished so far.
    cycles: Arc<AtomicU64>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ScavengerDaemon {
    /// Starts the scan loop. The first scan is attempted right away.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: ScavengerConfig) -> ZipspoolResult<Self> {
        let scavenger = Scavenger::new(config)?;
        let cancel = CancellationToken::new();
        let cycles = Arc::new(AtomicU64::new(0));

        tracing::info!(
            "scavenger daemon started for {} (every {:?})",
            scavenger.config().get_archive_base().display(),
            scavenger.config().get_rotation_span()
        );

        let task = tokio::spawn(scan_periodically(scavenger, cancel.clone(), cycles.clone()));

        Ok(Self {
            cancel,
            task,
            cycles,
        })
    }

    /// Returns how many scan attempts have finished, skipped ones included.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Acquire)
    }

    /// Returns `true` if the scan loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the scan loop and waits for it to exit.
    pub async fn shutdown(self) -> ZipspoolResult<()> {
        self.cancel.cancel();
        self.task.await?;
        tracing::info!("scavenger daemon stopped");
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

async fn scan_periodically(scavenger: Scavenger, cancel: CancellationToken, cycles: Arc<AtomicU64>) {
    let span = *scavenger.config().get_rotation_span();
    let grace = *scavenger.config().get_shutdown_grace();

    loop {
        let mut pass = tokio::task::spawn_blocking({
            let scavenger = scavenger.clone();
            move || scavenger.try_scan(false)
        });

        tokio::select! {
            result = &mut pass => {
                report(result);
                cycles.fetch_add(1, Ordering::AcqRel);
            }
            _ = cancel.cancelled() => {
                finish_in_flight(pass, grace).await;
                cycles.fetch_add(1, Ordering::AcqRel);
                break;
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = time::sleep(span) => {}
        }
    }
}

/// Waits up to `grace` for a pass that was running when the daemon was cancelled.
///
/// A blocking task cannot be interrupted; if the grace runs out it keeps running detached and
/// whatever it has not merged yet stays in the inbox.
async fn finish_in_flight(pass: JoinHandle<ZipspoolResult<ScanOutcome>>, grace: Duration) {
    tracing::info!("waiting up to {:?} for the running merge pass", grace);
    match time::timeout(grace, pass).await {
        Ok(result) => report(result),
        Err(_) => tracing::warn!("merge pass still running after {:?}, abandoning it", grace),
    }
}

fn report(result: Result<ZipspoolResult<ScanOutcome>, JoinError>) {
    match result {
        Ok(Ok(ScanOutcome::Completed(stats))) => {
            tracing::debug!("merge pass finished: {}", stats)
        }
        Ok(Ok(ScanOutcome::Skipped(reason))) => tracing::debug!("merge pass skipped: {:?}", reason),
        Ok(Err(e)) => tracing::error!("merge pass failed: {}", e),
        Err(e) => tracing::error!("merge pass panicked: {}", e),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use chrono::{TimeDelta, Utc};

    use super::*;
    use crate::{
        container::{ContainerReader, ContainerWriter},
        utils::{self, TempContainerName},
    };

    #[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
    async fn test_daemon_merges_and_shuts_down() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let inbox = utils::inbox_dir(dir.path());
        std::fs::create_dir_all(&inbox)?;

        let name = TempContainerName::generate("h", Utc::now() - TimeDelta::hours(3));
        let temp = inbox.join(name.file_name());
        let mut writer = ContainerWriter::create(&temp)?;
        writer.write_entry("a/b/c.txt", b"Lorem ipsum", None)?;
        writer.finish()?;

        let daemon = ScavengerDaemon::start(
            ScavengerConfig::builder()
                .archive_base(dir.path())
                .rotation_span(Duration::from_secs(3600))
                .build(),
        )?;

        let waited = time::timeout(Duration::from_secs(10), async {
            while daemon.cycles() == 0 {
                time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(waited.is_ok());
        assert!(!temp.exists());

        daemon.shutdown().await?;

        let mut reader = ContainerReader::open(dir.path().join("a.zip"))?;
        assert_eq!(reader.read_by_name("b/c.txt")?, Some(b"Lorem ipsum".to_vec()));

        Ok(())
    }

    /// Starts a daemon whose first pass spends `repair_secs` in a repair program that then fails.
    async fn start_with_slow_pass(
        base: &std::path::Path,
        repair_secs: u64,
        grace: Duration,
    ) -> anyhow::Result<ScavengerDaemon> {
        let inbox = utils::inbox_dir(base);
        std::fs::create_dir_all(&inbox)?;
        let name = TempContainerName::generate("h", Utc::now() - TimeDelta::hours(3));
        std::fs::write(inbox.join(name.file_name()), b"corrupt")?;

        let script = base.join("slow-repair.sh");
        std::fs::write(&script, format!("sleep {repair_secs}\nexit 1\n"))?;

        let daemon = ScavengerDaemon::start(
            ScavengerConfig::builder()
                .archive_base(base)
                .rotation_span(Duration::from_secs(3600))
                .repair_program(format!("sh {}", script.display()))
                .shutdown_grace(grace)
                .build(),
        )?;

        // Let the pass reach the repair program.
        time::sleep(Duration::from_millis(300)).await;
        assert_eq!(daemon.cycles(), 0);

        Ok(daemon)
    }

    #[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
    async fn test_shutdown_waits_for_running_pass() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let daemon = start_with_slow_pass(dir.path(), 2, Duration::from_secs(10)).await?;

        let started = Instant::now();
        daemon.shutdown().await?;
        assert!(started.elapsed() >= Duration::from_secs(1));

        Ok(())
    }

    #[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
    async fn test_shutdown_abandons_pass_after_grace() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let daemon = start_with_slow_pass(dir.path(), 3, Duration::from_millis(100)).await?;

        let started = Instant::now();
        daemon.shutdown().await?;
        assert!(started.elapsed() < Duration::from_secs(2));

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_shutdown_interrupts_sleep() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let daemon = ScavengerDaemon::start(
            ScavengerConfig::builder()
                .archive_base(dir.path())
                .rotation_span(Duration::from_secs(3600))
                .build(),
        )?;

        time::timeout(Duration::from_secs(10), daemon.shutdown()).await??;

        Ok(())
    }
}
