mod client;
mod cohort;
mod config;
mod error;
mod http;
mod logging;
mod pipeline;
mod scheduler;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use hyperindex_core::{Clock, SystemClock, Tier};
use hyperindex_store::SnapshotStore;
use tokio_util::sync::CancellationToken;

use crate::client::HyperliquidClient;
use crate::config::{AppConfig, ConfigOverrides};
use crate::logging::LoggingConfig;
use crate::pipeline::{Pipeline, PipelineSettings};
use crate::scheduler::{run_daemon, Scheduler, TickOutcome};

#[derive(Parser)]
#[command(name = "hyperindex", version, about = "Cohort conviction index for Hyperliquid perpetuals")]
struct Cli {
    /// Configuration file (default: config/default.* and config/local.*)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory holding the latest, history, backup and health records
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Cadence preset: standard or fast
    #[arg(long, global = true)]
    tier: Option<Tier>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one cycle and exit (for cron and systemd timers)
    Run,
    /// Run cycles on the configured cadence until interrupted
    Daemon,
    /// Print the current health record as JSON
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let overrides = ConfigOverrides {
        config_file: cli.config,
        data_dir: cli.data_dir,
        tier: cli.tier,
    };

    let config = match AppConfig::load(&overrides) {
        Ok(config) => config,
        Err(e) => {
            LoggingConfig::default().init();
            tracing::error!(error = %e, "Failed to load config");
            return Err(anyhow::anyhow!("Failed to load config: {}", e));
        }
    };
    config.logging.init();

    match cli.command {
        Command::Run => run_once(&config).await,
        Command::Daemon => daemon(config).await,
        Command::Status => status(&config),
    }
}

fn build_scheduler(config: &AppConfig) -> anyhow::Result<Scheduler> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let client = HyperliquidClient::new(config.fetch_timeout(), config.requests_per_second())?
        .with_base_url(&config.exchange.api_url);
    let store = SnapshotStore::new(config.data_dir(), config.store_options()).with_clock(clock.clone());
    let pipeline = Pipeline::new(
        Arc::new(client),
        store,
        PipelineSettings::from_config(config),
        clock.clone(),
    );
    Ok(Scheduler::new(
        pipeline,
        clock,
        config.schedule.max_consecutive_persistence_failures,
    ))
}

async fn run_once(config: &AppConfig) -> anyhow::Result<ExitCode> {
    let mut scheduler = build_scheduler(config)?;

    let outcome = scheduler.tick().await;
    match &outcome {
        TickOutcome::Completed {
            generated_at,
            assets,
            wallets_failed,
        } => println!(
            "[RUN] Snapshot {} written ({} assets, {} wallets failed)",
            generated_at.to_rfc3339(),
            assets,
            wallets_failed
        ),
        TickOutcome::Skipped { reason } => println!("[RUN] Skipped: {}", reason),
        TickOutcome::Failed { kind, detail } => println!("[RUN] Failed ({:?}): {}", kind, detail),
        TickOutcome::Alarm {
            consecutive_failures,
            detail,
        } => println!("[RUN] ALARM after {} failures: {}", consecutive_failures, detail),
    }

    Ok(if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn daemon(config: AppConfig) -> anyhow::Result<ExitCode> {
    let cadence = config.cadence().clone();

    println!("================================================");
    println!("          HYPERINDEX - Starting Up              ");
    println!("================================================");
    println!("[CONFIG] Exchange: {}", config.exchange.api_url);
    println!("[CONFIG] Cohort: {}", config.cohort.wallets_file.display());
    println!("[CONFIG] Data dir: {}", config.data_dir().display());
    println!("[CONFIG] Tier: {:?} ({})", config.schedule.cadence.tier, cadence.describe());

    let scheduler = build_scheduler(&config)?;
    let shutdown = CancellationToken::new();

    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            ctrl_c.cancel();
        }
    });

    let http_task = if config.http.enabled {
        println!("[HTTP] Routes: /health, /api/v1/snapshot/latest, /api/v1/history");
        let state = http::ApiState {
            store: SnapshotStore::new(config.data_dir(), config.store_options()),
        };
        let addr = config.http.addr.clone();
        let token = shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = http::serve(&addr, state, token).await {
                tracing::error!(error = %e, "HTTP endpoint failed");
            }
        }))
    } else {
        None
    };

    tracing::info!(cadence = %cadence.describe(), "Scheduler started");
    let result = run_daemon(
        scheduler,
        cadence,
        config.schedule.run_on_start,
        shutdown.clone(),
    )
    .await;

    shutdown.cancel();
    if let Some(task) = http_task {
        let _ = task.await;
    }

    match result {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(alarm) => {
            tracing::error!(error = %alarm, "Scheduler stopped on alarm");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn status(config: &AppConfig) -> anyhow::Result<ExitCode> {
    let store = SnapshotStore::new(config.data_dir(), config.store_options());
    match store.health().read() {
        Some(health) => {
            println!("{}", serde_json::to_string_pretty(&health)?);
            Ok(ExitCode::SUCCESS)
        }
        None => {
            eprintln!("No run recorded in {}", config.data_dir().display());
            Ok(ExitCode::FAILURE)
        }
    }
}
