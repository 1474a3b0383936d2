use std::{
    fmt::Write as _,
    io::Write as _,
    path::Path,
    sync::{Arc, Barrier},
    thread,
    time::Duration,
};

use zipspool::{
    config::{ScavengerConfig, SpoolConfig},
    container::ContainerReader,
    scavenger::{ScanOutcome, Scavenger},
    spool::{Spool, SpoolHandle, WriteMode},
    utils,
};

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test_log::test(tokio::test)]
async fn test_spooled_output_lands_in_destination_container() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let base = dir.path().join("archives");
    let pickup_file = dir.path().join("e.txt.tmp");

    Spool::run(spool_config(&base), |spool| {
        let pickup_file = pickup_file.clone();
        async move {
            let mut bin = spool.scoped_write("a/b/c.txt", WriteMode::Binary)?;
            bin.write_all(b"Lorem ipsum")?;
            bin.close()?;

            let mut text = spool.scoped_write("a/b/d.txt", WriteMode::Text)?;
            text.write_str("Lorem ipsum")?;
            text.close()?;

            let pickup = spool.scoped_external_pickup(&pickup_file, "a/b/e.txt")?;
            std::fs::write(pickup.temp_file(), "dolor sit amet")?;
            pickup.close()?;

            anyhow::Ok(())
        }
    })
    .await??;
    assert!(!pickup_file.exists());

    let outcome = scavenger(&base).try_scan(true)?;
    let ScanOutcome::Completed(stats) = outcome else {
        panic!("scan was skipped: {outcome:?}");
    };
    assert_eq!(stats.files_copied, 3);
    assert_eq!(stats.temp_containers, 1);
    assert_eq!(stats.dest_containers, 1);

    let mut reader = ContainerReader::open(base.join("a.zip"))?;
    assert_eq!(reader.entries()?.len(), 3);
    assert_eq!(reader.read_by_name("b/c.txt")?, Some(b"Lorem ipsum".to_vec()));
    assert_eq!(reader.read_by_name("b/d.txt")?, Some(b"Lorem ipsum".to_vec()));
    assert_eq!(reader.read_by_name("b/e.txt")?, Some(b"dolor sit amet".to_vec()));

    assert!(inbox_containers(&base).is_empty());

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_failed_scope_is_not_merged() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let base = dir.path().join("archives");

    let result = Spool::run(spool_config(&base), failing_producer).await?;
    assert!(result.is_err());

    scavenger(&base).try_scan(true)?;

    let mut reader = ContainerReader::open(base.join("run.zip"))?;
    assert_eq!(reader.read_by_name("ok.txt")?, Some(b"kept".to_vec()));
    assert!(!reader.contains("broken.txt"));

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_parallel_spools_and_scavengers() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let base = dir.path().join("archives");

    let mut spools = Vec::new();
    for _ in 0..3 {
        spools.push(Spool::start(spool_config(&base)).await?);
    }
    for (i, spool) in spools.iter().enumerate() {
        spool.commit_write(&format!("shared/from-{i}.txt"), format!("{i}").as_bytes(), true)?;
        spool.commit_write("shared/common.txt", format!("{i}").as_bytes(), true)?;
    }
    for spool in &spools {
        spool.shutdown().await?;
    }
    assert_eq!(inbox_containers(&base).len(), 3);

    let barrier = Arc::new(Barrier::new(3));
    let handles: Vec<_> = (0..3)
        .map(|_| {
            let scavenger = scavenger(&base);
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                scavenger.try_scan(true)
            })
        })
        .collect();

    let mut copied = 0;
    for handle in handles {
        if let ScanOutcome::Completed(stats) = handle.join().expect("scan thread")? {
            copied += stats.files_copied;
        }
    }
    assert_eq!(copied, 4);
    assert!(inbox_containers(&base).is_empty());

    let mut reader = ContainerReader::open(base.join("shared.zip"))?;
    assert_eq!(reader.entries()?.len(), 4);
    for i in 0..3 {
        assert_eq!(
            reader.read_by_name(&format!("from-{i}.txt"))?,
            Some(format!("{i}").into_bytes())
        );
    }
    assert!(reader.contains("common.txt"));

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

async fn failing_producer(spool: SpoolHandle) -> anyhow::Result<()> {
    let mut ok = spool.scoped_write("run/ok.txt", WriteMode::Binary)?;
    ok.write_all(b"kept")?;
    ok.close()?;

    let mut broken = spool.scoped_write("run/broken.txt", WriteMode::Binary)?;
    broken.write_all(b"half")?;
    anyhow::bail!("producer failed");
}

fn spool_config(base: &Path) -> SpoolConfig {
    SpoolConfig::builder()
        .archive_base(base)
        .rotation_span(Duration::from_secs(3600))
        .success_only(true)
        .build()
}

fn scavenger(base: &Path) -> Scavenger {
    Scavenger::new(
        ScavengerConfig::builder()
            .archive_base(base)
            .rotation_span(Duration::from_secs(3600))
            .build(),
    )
    .expect("valid scavenger config")
}

fn inbox_containers(base: &Path) -> Vec<std::path::PathBuf> {
    std::fs::read_dir(utils::inbox_dir(base))
        .map(|entries| {
            entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|e| e == utils::CONTAINER_EXTENSION))
                .collect()
        })
        .unwrap_or_default()
}
