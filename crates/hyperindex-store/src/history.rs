//! Snapshot history
//!
//! Each run appends a reduced copy of its snapshot: portfolio totals and the
//! per-asset tilt, conviction and net exposure, without wallet detail. Two
//! series are kept. `entries` holds every run; `hourly` keeps the latest run
//! of each UTC hour for long-range charts.

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};

use hyperindex_core::{PortfolioTotals, Snapshot};

use crate::error::{PersistenceError, PersistenceResult};

pub const DEFAULT_MAX_HISTORY_POINTS: usize = 2000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetTrendPoint {
    pub asset: String,
    pub net_exposure: f64,
    pub tilt: f64,
    pub conviction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub generated_at: DateTime<Utc>,
    pub cohort_size: usize,
    pub totals: PortfolioTotals,
    pub assets: Vec<AssetTrendPoint>,
}

impl From<&Snapshot> for HistoryEntry {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            generated_at: snapshot.generated_at,
            cohort_size: snapshot.cohort_size,
            totals: snapshot.totals.clone(),
            assets: snapshot
                .assets
                .iter()
                .map(|a| AssetTrendPoint {
                    asset: a.asset.clone(),
                    net_exposure: a.net_exposure,
                    tilt: a.tilt,
                    conviction: a.conviction,
                })
                .collect(),
        }
    }
}

impl HistoryEntry {
    pub fn asset(&self, symbol: &str) -> Option<&AssetTrendPoint> {
        self.assets.iter().find(|a| a.asset == symbol)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Retention limits, applied by dropping the oldest points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_points: usize,
    pub max_hourly_points: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_points: DEFAULT_MAX_HISTORY_POINTS,
            max_hourly_points: DEFAULT_MAX_HISTORY_POINTS,
        }
    }
}

/// Contents of `history.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub entries: Vec<HistoryEntry>,

    #[serde(default)]
    pub hourly: Vec<HistoryEntry>,

    #[serde(default)]
    pub date_range: Option<DateRange>,
}

impl HistoryRecord {
    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    /// The two most recent entries as (previous, latest).
    pub fn latest_pair(&self) -> Option<(&HistoryEntry, &HistoryEntry)> {
        match self.entries.as_slice() {
            [.., previous, latest] => Some((previous, latest)),
            _ => None,
        }
    }

    /// Append an entry, rejecting it unless it is strictly newer than the last one.
    pub fn append(&mut self, entry: HistoryEntry, policy: &RetentionPolicy) -> PersistenceResult<()> {
        if let Some(last) = self.last() {
            if entry.generated_at <= last.generated_at {
                return Err(PersistenceError::OutOfOrder {
                    last: last.generated_at,
                    attempted: entry.generated_at,
                });
            }
        }

        let at = entry.generated_at;
        match self.hourly.last_mut() {
            Some(latest) if same_hour(latest.generated_at, at) => *latest = entry.clone(),
            _ => self.hourly.push(entry.clone()),
        }
        self.entries.push(entry);

        truncate_front(&mut self.entries, policy.max_points);
        truncate_front(&mut self.hourly, policy.max_hourly_points);

        self.updated_at = Some(at);
        self.date_range = match (self.entries.first(), self.entries.last()) {
            (Some(first), Some(last)) => Some(DateRange {
                start: first.generated_at,
                end: last.generated_at,
            }),
            _ => None,
        };
        Ok(())
    }
}

fn same_hour(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    match (a.duration_trunc(Duration::hours(1)), b.duration_trunc(Duration::hours(1))) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn truncate_front<T>(items: &mut Vec<T>, max: usize) {
    if items.len() > max {
        let excess = items.len() - max;
        items.drain(..excess);
    }
}
