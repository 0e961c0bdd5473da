//! Dashboard rendering
//!
//! Rendering is a pure function of a [`DashboardView`] and the current time,
//! so the polling loop only has to load state and print.

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use hyperindex_core::{Cadence, Snapshot};
use hyperindex_store::{HealthStatus, HistoryRecord, SnapshotStore};
use owo_colors::OwoColorize;

const BAR_WIDTH: usize = 40;
const TOP_ASSETS: usize = 3;

/// Immutable copies of everything the dashboard shows.
#[derive(Debug, Clone)]
pub struct DashboardView {
    pub data_dir: PathBuf,
    pub cadence: Cadence,
    pub health: Option<HealthStatus>,
    pub latest: Option<Snapshot>,
    pub history: Option<HistoryRecord>,
}

impl DashboardView {
    /// Read the current records. Anything unreadable is shown as missing.
    pub fn load(store: &SnapshotStore, cadence: &Cadence) -> Self {
        let latest = store.read_latest().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Latest record unreadable");
            None
        });
        let history = store
            .read_history()
            .map_err(|e| tracing::warn!(error = %e, "History record unreadable"))
            .ok();

        Self {
            data_dir: store.dir().to_path_buf(),
            cadence: cadence.clone(),
            health: store.health().read(),
            latest,
            history,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.health.is_some() || self.latest.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tone {
    Good,
    Bad,
    Warn,
    Dim,
    Bold,
    Accent,
}

/// ANSI styling, or plain text when disabled.
#[derive(Debug, Clone, Copy)]
pub struct Palette {
    enabled: bool,
}

impl Palette {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    fn paint(&self, text: &str, tone: Tone) -> String {
        if !self.enabled {
            return text.to_string();
        }
        match tone {
            Tone::Good => text.green().to_string(),
            Tone::Bad => text.red().to_string(),
            Tone::Warn => text.yellow().to_string(),
            Tone::Dim => text.dimmed().to_string(),
            Tone::Bold => text.bold().to_string(),
            Tone::Accent => text.cyan().to_string(),
        }
    }

    fn signed(&self, value: f64, text: &str) -> String {
        let tone = if value > 0.0 {
            Tone::Good
        } else if value < 0.0 {
            Tone::Bad
        } else {
            Tone::Dim
        };
        self.paint(text, tone)
    }
}

pub fn render_dashboard(view: &DashboardView, now: DateTime<Utc>, palette: Palette) -> String {
    let mut lines = Vec::new();

    lines.push(format!(
        "{}  {}",
        palette.paint("HYPERINDEX MONITOR", Tone::Bold),
        palette.paint(&now.format("%Y-%m-%d %H:%M:%S UTC").to_string(), Tone::Dim)
    ));
    lines.push(palette.paint(
        &format!("data: {}  |  cadence: {}", view.data_dir.display(), view.cadence.describe()),
        Tone::Dim,
    ));
    lines.push(String::new());

    if !view.is_initialized() {
        lines.push(palette.paint("Not yet initialized", Tone::Warn));
        lines.push(format!(
            "  No health or snapshot record in {}. Waiting for the first run.",
            view.data_dir.display()
        ));
        lines.push(String::new());
        push_schedule(&mut lines, view, now, palette);
        return lines.join("\n");
    }

    push_last_run(&mut lines, view, now, palette);
    push_schedule(&mut lines, view, now, palette);

    match &view.latest {
        Some(snapshot) => {
            push_snapshot(&mut lines, snapshot, view, now, palette);
            push_trend(&mut lines, view, palette);
        }
        None => {
            lines.push(palette.paint("SNAPSHOT", Tone::Accent));
            lines.push("  No data available".to_string());
        }
    }

    lines.join("\n")
}

fn push_last_run(lines: &mut Vec<String>, view: &DashboardView, now: DateTime<Utc>, palette: Palette) {
    lines.push(palette.paint("LAST RUN", Tone::Accent));
    let Some(health) = &view.health else {
        lines.push("  No run recorded".to_string());
        lines.push(String::new());
        return;
    };

    let outcome = if health.is_success() {
        palette.paint("SUCCESS", Tone::Good)
    } else {
        palette.paint("FAILURE", Tone::Bad)
    };
    lines.push(format!(
        "  {} ({} ago)  {}  wallets {}/{} ok  {:.1}s",
        health.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        fmt_duration(now - health.timestamp),
        outcome,
        health.wallets_ok(),
        health.wallets_total,
        health.duration_ms as f64 / 1000.0
    ));
    if let Some(detail) = &health.error_detail {
        lines.push(format!("  {}", palette.paint(&format!("error: {}", detail), Tone::Bad)));
    }
    if health.consecutive_failures > 1 {
        lines.push(format!(
            "  {}",
            palette.paint(
                &format!("{} consecutive failures", health.consecutive_failures),
                Tone::Warn
            )
        ));
    }
    lines.push(String::new());
}

fn push_schedule(lines: &mut Vec<String>, view: &DashboardView, now: DateTime<Utc>, palette: Palette) {
    let previous = view.cadence.previous_at_or_before(now);
    let next = view.cadence.next_after(now);
    let total = (next - previous).num_milliseconds();
    let elapsed = (now - previous).num_milliseconds();
    let progress = if total > 0 {
        (elapsed as f64 / total as f64).clamp(0.0, 1.0)
    } else {
        0.0
    };

    lines.push(palette.paint("NEXT RUN", Tone::Accent));
    lines.push(format!(
        "  {} (in {})",
        next.format("%Y-%m-%d %H:%M:%S UTC"),
        fmt_duration(next - now)
    ));
    lines.push(format!("  [{}] {:5.1}%", progress_bar(progress, BAR_WIDTH), progress * 100.0));
    lines.push(String::new());
}

fn push_snapshot(
    lines: &mut Vec<String>,
    snapshot: &Snapshot,
    view: &DashboardView,
    now: DateTime<Utc>,
    palette: Palette,
) {
    let age = now - snapshot.generated_at;
    let freshness = if age > view.cadence.period() * 2 {
        palette.paint("STALE", Tone::Warn)
    } else {
        palette.paint("FRESH", Tone::Good)
    };

    lines.push(palette.paint("SNAPSHOT", Tone::Accent));
    lines.push(format!(
        "  generated {} ({} ago)  {}  cohort {}/{}",
        snapshot.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
        fmt_duration(age),
        freshness,
        snapshot.cohort_size,
        snapshot.wallets_total
    ));
    lines.push(String::new());

    let totals = &snapshot.totals;
    lines.push(palette.paint("PORTFOLIO", Tone::Accent));
    lines.push(format!(
        "  conviction {}  net leverage {:.2}x  cohort leverage {:.2}x",
        palette.signed(totals.conviction, &format!("{:+.3}", totals.conviction)),
        totals.net_leverage,
        totals.cohort_leverage
    ));
    lines.push(format!(
        "  equity {}  gross {}  net {}",
        fmt_money(totals.total_equity),
        fmt_money(totals.gross_notional),
        palette.signed(totals.net_exposure, &fmt_money(totals.net_exposure))
    ));
    lines.push(String::new());

    lines.push(palette.paint("TOP ASSETS", Tone::Accent));
    if snapshot.assets.is_empty() {
        lines.push("  No open positions".to_string());
    }
    for asset in snapshot.top_assets(TOP_ASSETS) {
        lines.push(format!(
            "  {:<8} net {:>9}  tilt {}  conviction {}",
            asset.asset,
            palette.signed(asset.net_exposure, &fmt_money(asset.net_exposure)),
            palette.signed(asset.tilt, &format!("{:+.2}", asset.tilt)),
            palette.signed(asset.conviction, &format!("{:+.3}", asset.conviction))
        ));
    }
    lines.push(String::new());
}

fn push_trend(lines: &mut Vec<String>, view: &DashboardView, palette: Palette) {
    let Some((previous, latest)) = view.history.as_ref().and_then(|h| h.latest_pair()) else {
        return;
    };
    let conviction = latest.totals.conviction - previous.totals.conviction;
    let net = latest.totals.net_exposure - previous.totals.net_exposure;

    lines.push(palette.paint("TREND (vs previous run)", Tone::Accent));
    lines.push(format!(
        "  conviction {}  net exposure {}",
        palette.signed(conviction, &format!("{:+.3}", conviction)),
        palette.signed(net, &fmt_money(net))
    ));
}

/// Compact signed dollar amount: `+$1.2M`, `-$350.0K`, `$0`.
pub fn fmt_money(value: f64) -> String {
    let abs = value.abs();
    let sign = if value > 0.0 {
        "+"
    } else if value < 0.0 {
        "-"
    } else {
        ""
    };
    if abs >= 1e9 {
        format!("{}${:.1}B", sign, abs / 1e9)
    } else if abs >= 1e6 {
        format!("{}${:.1}M", sign, abs / 1e6)
    } else if abs >= 1e3 {
        format!("{}${:.1}K", sign, abs / 1e3)
    } else {
        format!("{}${:.0}", sign, abs)
    }
}

pub fn fmt_duration(duration: Duration) -> String {
    let secs = duration.num_seconds().max(0);
    let (days, hours, minutes, seconds) = (secs / 86_400, secs % 86_400 / 3600, secs % 3600 / 60, secs % 60);
    if days > 0 {
        format!("{}d {}h", days, hours)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

pub fn progress_bar(progress: f64, width: usize) -> String {
    let filled = ((width as f64) * progress.clamp(0.0, 1.0)) as usize;
    format!("{}{}", "█".repeat(filled), "░".repeat(width - filled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use hyperindex_core::{AssetAggregate, PortfolioTotals};
    use hyperindex_store::{FailureKind, HistoryEntry, Outcome, RetentionPolicy};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 18, h, m, 0).unwrap()
    }

    fn asset(symbol: &str, net: f64) -> AssetAggregate {
        AssetAggregate {
            asset: symbol.to_string(),
            net_exposure: net,
            long_notional: net.max(0.0),
            short_notional: (-net).max(0.0),
            conviction: net.signum() * 0.5,
            tilt: net.signum(),
            net_leverage: 3.0,
            position_count: 2,
            long_wallets: 1,
            short_wallets: 1,
            margin_leverage: 3.0,
            equity_leverage: 0.1,
            equity_conviction: 0.0,
        }
    }

    fn snapshot(generated_at: DateTime<Utc>, conviction: f64) -> Snapshot {
        Snapshot {
            generated_at,
            cohort_rebalanced_at: None,
            cohort_size: 40,
            wallets_total: 42,
            wallets_failed: 2,
            totals: PortfolioTotals {
                net_exposure: 1_250_000.0,
                gross_notional: 9_000_000.0,
                total_equity: 3_000_000.0,
                net_leverage: 4.2,
                conviction,
                cohort_leverage: 3.0,
                ..PortfolioTotals::default()
            },
            assets: vec![
                asset("BTC", 900_000.0),
                asset("ETH", -400_000.0),
                asset("SOL", 120_000.0),
                asset("DOGE", 5_000.0),
            ],
        }
    }

    fn health(outcome: Outcome) -> HealthStatus {
        HealthStatus {
            timestamp: at(12, 0),
            outcome,
            duration_ms: 2400,
            error_detail: (outcome == Outcome::Failure).then(|| "All 42 wallet fetches failed".to_string()),
            error_kind: (outcome == Outcome::Failure).then_some(FailureKind::AllWalletsFailed),
            wallets_total: 42,
            wallets_failed: 2,
            failure_rate: 2.0 / 42.0,
            conviction: None,
            consecutive_failures: if outcome == Outcome::Failure { 2 } else { 0 },
        }
    }

    fn view() -> DashboardView {
        DashboardView {
            data_dir: PathBuf::from("data"),
            cadence: Cadence::standard(),
            health: None,
            latest: None,
            history: None,
        }
    }

    #[test]
    fn test_fmt_money() {
        assert_eq!(fmt_money(1_234_567.0), "+$1.2M");
        assert_eq!(fmt_money(-350_000.0), "-$350.0K");
        assert_eq!(fmt_money(2.5e9), "+$2.5B");
        assert_eq!(fmt_money(42.4), "+$42");
        assert_eq!(fmt_money(0.0), "$0");
    }

    #[test]
    fn test_fmt_duration() {
        assert_eq!(fmt_duration(Duration::seconds(42)), "42s");
        assert_eq!(fmt_duration(Duration::seconds(190)), "3m 10s");
        assert_eq!(fmt_duration(Duration::minutes(357)), "5h 57m");
        assert_eq!(fmt_duration(Duration::hours(52)), "2d 4h");
        assert_eq!(fmt_duration(Duration::seconds(-5)), "0s");
    }

    #[test]
    fn test_progress_bar() {
        assert_eq!(progress_bar(0.5, 4), "██░░");
        assert_eq!(progress_bar(1.5, 3), "███");
        assert_eq!(progress_bar(0.0, 2), "░░");
    }

    #[test]
    fn test_uninitialized_view() {
        let output = render_dashboard(&view(), at(3, 0), Palette::new(false));

        assert!(output.contains("Not yet initialized"));
        assert!(output.contains("2026-02-18 06:00:00 UTC (in 3h 0m)"));
        assert!(!output.contains("LAST RUN"));
    }

    #[test]
    fn test_full_view() {
        let mut history = HistoryRecord::default();
        let policy = RetentionPolicy::default();
        history
            .append(HistoryEntry::from(&snapshot(at(6, 0), 0.20)), &policy)
            .unwrap();
        history
            .append(HistoryEntry::from(&snapshot(at(12, 0), 0.25)), &policy)
            .unwrap();

        let view = DashboardView {
            health: Some(health(Outcome::Success)),
            latest: Some(snapshot(at(12, 0), 0.25)),
            history: Some(history),
            ..view()
        };
        let output = render_dashboard(&view, at(15, 0), Palette::new(false));

        assert!(output.contains("SUCCESS"));
        assert!(output.contains("wallets 40/42 ok"));
        assert!(output.contains("[████████████████████░░░░░░░░░░░░░░░░░░░░]  50.0%"));
        assert!(output.contains("FRESH"));
        assert!(output.contains("conviction +0.250"));
        assert!(output.contains("BTC"));
        assert!(output.contains("ETH"));
        assert!(output.contains("SOL"));
        assert!(!output.contains("DOGE"));
        assert!(output.contains("conviction +0.050  net exposure $0"));
    }

    #[test]
    fn test_failure_and_stale_snapshot() {
        let view = DashboardView {
            health: Some(health(Outcome::Failure)),
            latest: Some(snapshot(at(0, 0), 0.1)),
            ..view()
        };
        let output = render_dashboard(&view, at(13, 0), Palette::new(false));

        assert!(output.contains("FAILURE"));
        assert!(output.contains("error: All 42 wallet fetches failed"));
        assert!(output.contains("2 consecutive failures"));
        assert!(output.contains("STALE"));
        assert!(!output.contains("TREND"));
    }

    #[test]
    fn test_health_without_snapshot() {
        let view = DashboardView {
            health: Some(health(Outcome::Failure)),
            ..view()
        };
        let output = render_dashboard(&view, at(12, 30), Palette::new(false));
        assert!(output.contains("No data available"));
    }

    #[test]
    fn test_load_from_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path(), Default::default());

        let view = DashboardView::load(&store, &Cadence::fast());

        assert!(!view.is_initialized());
        assert!(view.history.unwrap().entries.is_empty());
    }

    #[test]
    fn test_colors_only_when_enabled() {
        let view = DashboardView {
            health: Some(health(Outcome::Success)),
            ..view()
        };
        let plain = render_dashboard(&view, at(12, 30), Palette::new(false));
        let colored = render_dashboard(&view, at(12, 30), Palette::new(true));
        assert!(!plain.contains('\u{1b}'));
        assert!(colored.contains('\u{1b}'));
    }
}
