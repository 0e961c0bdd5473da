//! Data models for cohort positioning
//!
//! Positions are fetched fresh every run and never persisted individually.
//! A run reduces them into a [`Snapshot`], which is the record the dashboard
//! consumes and the source of every history entry.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Wallets
// =============================================================================

/// A Hyperliquid account address (`0x` followed by 40 hex characters).
///
/// Cohort membership is supplied externally and may change between runs; the
/// address itself never changes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Wallet(String);

impl Wallet {
    /// Parse an address, returning `None` when it is not a 42 character hex address.
    pub fn parse(address: &str) -> Option<Self> {
        let address = address.trim();
        let hex = address.strip_prefix("0x")?;
        if hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(Self(address.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines.
    pub fn short(&self) -> &str {
        &self.0[..10.min(self.0.len())]
    }
}

impl fmt::Display for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Positions
// =============================================================================

/// Direction of a perpetual position
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Side implied by a signed quantity; `None` for zero.
    pub fn from_signed(value: f64) -> Option<Self> {
        if value > 0.0 {
            Some(Side::Long)
        } else if value < 0.0 {
            Some(Side::Short)
        } else {
            None
        }
    }

    pub fn sign(self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }
}

/// One open exposure of a wallet on one asset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    /// Upper-cased asset symbol (e.g. "BTC")
    pub asset: String,

    pub side: Side,

    /// Unsigned size in units of the asset
    pub size: f64,

    /// Size times mark price, in USD. Never negative.
    pub notional_value: f64,

    /// Position notional divided by margin
    pub leverage: f64,

    pub entry_price: Option<f64>,

    /// Margin allocated to the position, in USD
    pub margin_used: f64,
}

impl Position {
    /// Notional with the sign of the side (long positive, short negative).
    pub fn signed_notional(&self) -> f64 {
        self.side.sign() * self.notional_value
    }
}

/// Everything one fetch returned for a wallet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalletPositions {
    pub wallet: Wallet,

    /// Account value reported by the exchange, in USD
    pub equity: f64,

    pub positions: Vec<Position>,
}

impl WalletPositions {
    pub fn empty(wallet: Wallet) -> Self {
        Self {
            wallet,
            equity: 0.0,
            positions: Vec::new(),
        }
    }
}

// =============================================================================
// Aggregates
// =============================================================================

/// Cohort positioning in one asset for one run.
///
/// `long_notional` and `short_notional` are never negative and
/// `net_exposure == long_notional - short_notional`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssetAggregate {
    pub asset: String,
    pub net_exposure: f64,
    pub long_notional: f64,
    pub short_notional: f64,

    /// Tilt weighted by the share of the cohort on the dominant side, in [-1, 1]
    pub conviction: f64,

    /// Net over gross notional, in [-1, 1]
    pub tilt: f64,

    /// Notional-weighted mean leverage of the positions in this asset
    pub net_leverage: f64,

    pub position_count: usize,
    pub long_wallets: usize,
    pub short_wallets: usize,

    /// Net exposure over the margin backing it
    pub margin_leverage: f64,

    /// Net exposure over total cohort equity
    pub equity_leverage: f64,

    /// Equity-weighted agreement of wallet directions, in [-1, 1]
    pub equity_conviction: f64,
}

impl AssetAggregate {
    pub fn gross_notional(&self) -> f64 {
        self.long_notional + self.short_notional
    }

    /// Side holding more notional, `None` when balanced.
    pub fn dominant_side(&self) -> Option<Side> {
        Side::from_signed(self.net_exposure)
    }
}

/// Portfolio-level figures across every asset in the run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PortfolioTotals {
    pub gross_long: f64,
    pub gross_short: f64,
    pub net_exposure: f64,
    pub gross_notional: f64,
    pub total_equity: f64,

    /// Notional-weighted mean leverage over every position
    pub net_leverage: f64,

    /// Gross-notional-weighted mean of the listed assets' conviction
    pub conviction: f64,

    /// Gross notional over total equity
    pub cohort_leverage: f64,

    pub index_score: f64,
}

/// One run's complete output. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub generated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cohort_rebalanced_at: Option<String>,

    /// Wallets whose fetch succeeded and entered aggregation
    pub cohort_size: usize,

    /// Wallets listed in the cohort file for this run
    pub wallets_total: usize,

    pub wallets_failed: usize,

    pub totals: PortfolioTotals,

    /// Ordered by descending |net_exposure|, then ascending symbol
    pub assets: Vec<AssetAggregate>,
}

impl Snapshot {
    pub fn asset(&self, symbol: &str) -> Option<&AssetAggregate> {
        self.assets.iter().find(|a| a.asset == symbol)
    }

    /// The first `n` assets in presentation order.
    pub fn top_assets(&self, n: usize) -> &[AssetAggregate] {
        &self.assets[..n.min(self.assets.len())]
    }
}
