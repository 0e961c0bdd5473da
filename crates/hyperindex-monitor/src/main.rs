mod config;
mod render;

use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use hyperindex_core::{Cadence, Tier};
use hyperindex_store::{SnapshotStore, StoreOptions};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::MonitorConfig;
use crate::render::{render_dashboard, DashboardView, Palette};

const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

#[derive(Parser)]
#[command(name = "hyperindex-monitor", version, about = "Live terminal view of HyperIndex runs")]
struct Cli {
    /// Configuration file (default: config/default.* and config/local.*)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory the generator writes to
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Cadence preset used for the countdown: standard or fast
    #[arg(long)]
    tier: Option<Tier>,

    /// Print one frame and exit
    #[arg(long)]
    once: bool,

    /// Disable ANSI colors
    #[arg(long)]
    no_color: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = MonitorConfig::load(cli.config, cli.data_dir, cli.tier)
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let store = SnapshotStore::new(&config.store.data_dir, StoreOptions::default());
    let cadence = config.cadence().clone();
    let palette = Palette::new(config.monitor.color && !cli.no_color);

    if cli.once {
        let view = DashboardView::load(&store, &cadence);
        println!("{}", render_dashboard(&view, chrono::Utc::now(), palette));
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    tracing::info!(
        data_dir = %store.dir().display(),
        refresh_secs = config.refresh().as_secs(),
        "Monitor started"
    );
    watch(&store, &cadence, palette, config.refresh(), shutdown).await?;
    println!();
    Ok(())
}

/// Redraw on every refresh tick until cancelled.
async fn watch(
    store: &SnapshotStore,
    cadence: &Cadence,
    palette: Palette,
    refresh: std::time::Duration,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(refresh);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }

        let view = DashboardView::load(store, cadence);
        let frame = render_dashboard(&view, chrono::Utc::now(), palette);

        let mut stdout = std::io::stdout().lock();
        write!(stdout, "{}{}\n\n", CLEAR_SCREEN, frame)?;
        writeln!(
            stdout,
            "Refreshing every {}s. Press Ctrl+C to exit",
            refresh.as_secs()
        )?;
        stdout.flush()?;
    }
}
