use anyhow::Context;
use application::{SeedManager, TickOutcome};
use clap::Parser;
use config::Settings;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Moves finished torrent downloads through prepare, sync and clean-up.
#[derive(Parser, Debug)]
#[command(name = "seedmgr", version, about, long_about = None)]
struct Cli {
    /// Directory holding seedmgr.toml, .env, the lock file and the database.
    #[arg(long, env = "SEEDMGR_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Give failed torrents another attempt.
    #[arg(long)]
    retry: bool,

    /// debug, info, warning, error or critical.
    #[arg(long, default_value = "info")]
    loglevel: String,

    /// Append logs to this file instead of stderr.
    #[arg(long)]
    logfile: Option<PathBuf>,
}

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let level = match cli.loglevel.to_ascii_lowercase().as_str() {
        "warning" => "warn".to_string(),
        "critical" => "error".to_string(),
        other => other.to_string(),
    };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&level))?;

    match &cli.logfile {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_dir = cli
        .config_dir
        .clone()
        .unwrap_or_else(Settings::default_config_dir);
    let settings = Settings::load(&config_dir)
        .with_context(|| format!("loading configuration from {}", config_dir.display()))?;

    let interrupt = CancellationToken::new();
    let on_signal = interrupt.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight work");
            on_signal.cancel();
        }
    });

    let manager = SeedManager::new(settings, interrupt)?;
    match manager.tick(cli.retry).await? {
        TickOutcome::Locked => info!("tick skipped, run lock is held"),
        TickOutcome::Completed(report) => info!(
            loaded = report.load.loaded,
            workflows = report.workflows,
            tasks = report.scheduler.tasks,
            failed = report.scheduler.failed_tasks,
            finished = report.scheduler.finished,
            "tick complete"
        ),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = init_tracing(&cli) {
        eprintln!("seedmgr: {err:#}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %format!("{err:#}"), "seedmgr failed");
            ExitCode::FAILURE
        }
    }
}
