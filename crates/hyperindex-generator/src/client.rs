//! Hyperliquid info API client with rate limiting.
//!
//! Reads a wallet's open perpetual positions from the public
//! `clearinghouseState` endpoint. No authentication. Requests are throttled
//! client-side with the governor crate; retries are the caller's job.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use hyperindex_core::{Position, Side, Wallet, WalletPositions};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::error::FetchError;

/// Default Hyperliquid API base URL.
pub const HYPERLIQUID_API_URL: &str = "https://api.hyperliquid.xyz";

/// Sizes and notionals below this are dust.
const DUST: f64 = 1e-8;

/// Anything that can report a wallet's open positions.
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn fetch_positions(&self, wallet: &Wallet) -> Result<WalletPositions, FetchError>;
}

pub struct HyperliquidClient {
    http: Client,
    base_url: String,
    rate_limiter: Arc<
        RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>,
    >,
}

impl HyperliquidClient {
    pub fn new(timeout: Duration, requests_per_second: NonZeroU32) -> Result<Self, FetchError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Http(format!("Failed to build HTTP client: {}", e)))?;
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(requests_per_second)));

        Ok(Self {
            http,
            base_url: HYPERLIQUID_API_URL.to_string(),
            rate_limiter,
        })
    }

    /// Sets a custom base URL (useful for testing).
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn clearinghouse_state(&self, wallet: &Wallet) -> Result<ClearinghouseState, FetchError> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}/info", self.base_url);
        let body = serde_json::json!({
            "type": "clearinghouseState",
            "user": wallet.as_str(),
        });

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| FetchError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status,
                body: body.chars().take(200).collect(),
            });
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| FetchError::Malformed(e.to_string()))?;
        if !value.is_object() {
            return Err(FetchError::Malformed(format!("expected object, got {}", value)));
        }
        serde_json::from_value(value).map_err(|e| FetchError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl PositionSource for HyperliquidClient {
    async fn fetch_positions(&self, wallet: &Wallet) -> Result<WalletPositions, FetchError> {
        let start = Instant::now();
        let state = self.clearinghouse_state(wallet).await?;
        let positions = state.into_wallet_positions(wallet.clone());

        tracing::debug!(
            wallet = %wallet.short(),
            positions = positions.positions.len(),
            equity = positions.equity,
            duration_ms = %start.elapsed().as_millis(),
            "Fetched positions"
        );
        Ok(positions)
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClearinghouseState {
    #[serde(default)]
    margin_summary: Option<MarginSummary>,
    #[serde(default)]
    asset_positions: Vec<AssetPositionRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarginSummary {
    #[serde(default)]
    account_value: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct AssetPositionRow {
    #[serde(default)]
    position: Option<RawPosition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPosition {
    coin: Option<String>,
    szi: Option<Value>,
    position_value: Option<Value>,
    entry_px: Option<Value>,
    leverage: Option<RawLeverage>,
    margin_used: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawLeverage {
    value: Option<Value>,
}

impl ClearinghouseState {
    fn into_wallet_positions(self, wallet: Wallet) -> WalletPositions {
        let equity = self
            .margin_summary
            .and_then(|m| m.account_value)
            .as_ref()
            .and_then(decimal)
            .unwrap_or(0.0);

        let positions = self
            .asset_positions
            .into_iter()
            .filter_map(|row| row.position)
            .filter_map(RawPosition::into_position)
            .collect();

        WalletPositions {
            wallet,
            equity,
            positions,
        }
    }
}

impl RawPosition {
    /// `None` for incomplete rows and dust.
    fn into_position(self) -> Option<Position> {
        let asset = self.coin?.trim().to_uppercase();
        let signed_size = decimal(self.szi.as_ref()?)?;
        if asset.is_empty() || signed_size.abs() < DUST {
            return None;
        }
        let side = Side::from_signed(signed_size)?;

        let notional_value = decimal(self.position_value.as_ref()?)?.abs();
        if notional_value < DUST {
            return None;
        }

        let leverage = self
            .leverage
            .and_then(|l| l.value)
            .as_ref()
            .and_then(decimal)
            .filter(|l| *l > 0.0)
            .unwrap_or(1.0);
        let margin_used = self
            .margin_used
            .as_ref()
            .and_then(decimal)
            .unwrap_or(notional_value / leverage);

        Some(Position {
            asset,
            side,
            size: signed_size.abs(),
            notional_value,
            leverage,
            entry_price: self.entry_px.as_ref().and_then(decimal),
            margin_used,
        })
    }
}

/// The API sends decimals as strings, and sometimes as numbers.
fn decimal(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}
