use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::{fmt, EnvFilter};
use zipspool::{
    cli::{ZipspoolArgs, ZipspoolSubcommand},
    scavenger::{ScanOutcome, Scavenger, ScavengerDaemon},
    ZipspoolResult,
};

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ZipspoolResult<()> {
    let args = ZipspoolArgs::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    fmt()
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match args.subcommand {
        ZipspoolSubcommand::Scan { common, flush } => {
            let config = common.resolve()?.scavenger_config()?;
            tracing::trace!("scanning: config={config:?}, flush={flush}");

            let scavenger = Scavenger::new(config)?;
            let outcome = tokio::task::spawn_blocking(move || scavenger.try_scan(flush)).await??;

            if let ScanOutcome::Completed(stats) = outcome {
                if stats.files_copied > 0 {
                    println!("[{}]\t{}", chrono::Local::now().format("%y/%m/%d %H:%M:%S"), stats);
                }
            }
        }
        ZipspoolSubcommand::Daemon { common } => {
            let config = common.resolve()?.scavenger_config()?;
            tracing::trace!("starting daemon: config={config:?}");

            let daemon = ScavengerDaemon::start(config)?;
            wait_for_shutdown_signal().await?;
            daemon.shutdown().await?;
        }
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: *
//--------------------------------------------------------------------------------------------------

async fn wait_for_shutdown_signal() -> ZipspoolResult<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("received SIGTERM"),
        _ = sigint.recv() => tracing::info!("received SIGINT"),
    }

    Ok(())
}
