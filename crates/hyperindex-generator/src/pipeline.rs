//! One generation cycle: cohort → fetch → aggregate → persist.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use hyperindex_core::{aggregate, AggregationParams, Clock, CohortPositions, Snapshot, Wallet, WalletPositions};
use hyperindex_store::SnapshotStore;
use tokio::sync::Semaphore;

use crate::client::PositionSource;
use crate::cohort::load_cohort;
use crate::config::AppConfig;
use crate::error::{FetchError, RunError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first
    pub attempts: u32,
    /// Delay before the first retry, doubled for each further one
    pub backoff: Duration,
}

impl RetryPolicy {
    fn delay(&self, retry: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(retry))
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub wallets_file: PathBuf,
    pub cohort_rebalanced_at: Option<String>,
    pub max_concurrency: usize,
    pub wallet_timeout: Duration,
    pub retry: RetryPolicy,
    pub min_asset_notional: f64,
    pub lock_stale_after: chrono::Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            wallets_file: config.cohort.wallets_file.clone(),
            cohort_rebalanced_at: config.cohort.rebalanced_at.clone(),
            max_concurrency: config.fetch.max_concurrency.max(1),
            wallet_timeout: config.fetch_timeout(),
            retry: RetryPolicy {
                attempts: config.fetch.retry_attempts,
                backoff: Duration::from_millis(config.fetch.retry_backoff_ms),
            },
            min_asset_notional: config.aggregation.min_asset_notional,
            lock_stale_after: config.lock_stale_after(),
        }
    }
}

/// Counts of the fetch stage, reported whether or not the cycle succeeds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    pub wallets_total: usize,
    pub wallets_failed: usize,
}

#[derive(Debug)]
pub struct CycleError {
    pub error: RunError,
    pub stats: FetchStats,
}

impl CycleError {
    fn new(error: impl Into<RunError>, stats: FetchStats) -> Self {
        Self {
            error: error.into(),
            stats,
        }
    }
}

pub struct Pipeline {
    source: Arc<dyn PositionSource>,
    store: SnapshotStore,
    settings: PipelineSettings,
    clock: Arc<dyn Clock>,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn PositionSource>,
        store: SnapshotStore,
        settings: PipelineSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            store,
            settings,
            clock,
        }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Run one cycle under the writer lock.
    ///
    /// On failure the persisted records are left as they were.
    pub async fn run_cycle(&self) -> Result<Snapshot, CycleError> {
        let mut stats = FetchStats::default();

        let _lock = self
            .store
            .lock(self.settings.lock_stale_after)
            .map_err(|e| CycleError::new(e, stats))?;

        let wallets = load_cohort(&self.settings.wallets_file).map_err(|e| CycleError::new(e, stats))?;
        stats.wallets_total = wallets.len();

        let cohort = self.fetch_cohort(&wallets).await;
        stats.wallets_failed = cohort.wallets_failed;
        if cohort.wallets.is_empty() {
            return Err(CycleError::new(RunError::AllWalletsFailed(wallets.len()), stats));
        }

        let params = AggregationParams {
            min_asset_notional: self.settings.min_asset_notional,
            cohort_rebalanced_at: self.settings.cohort_rebalanced_at.clone(),
        };
        let snapshot = aggregate(&cohort, &params, self.clock.as_ref()).map_err(|e| CycleError::new(e, stats))?;

        self.store.persist(&snapshot).map_err(|e| CycleError::new(e, stats))?;
        Ok(snapshot)
    }

    /// Fetch every wallet with bounded concurrency. Failed wallets are
    /// counted and left out; the rest keep cohort order.
    async fn fetch_cohort(&self, wallets: &[Wallet]) -> CohortPositions {
        let start = Instant::now();
        let semaphore = Semaphore::new(self.settings.max_concurrency.clamp(1, Semaphore::MAX_PERMITS));

        let fetches: Vec<_> = wallets
            .iter()
            .map(|wallet| {
                let semaphore = &semaphore;
                async move {
                    match semaphore.acquire().await {
                        Ok(_permit) => self.fetch_with_retry(wallet).await,
                        Err(e) => Err(FetchError::Http(e.to_string())),
                    }
                }
            })
            .collect();
        // join_all yields results in input order
        let results = join_all(fetches).await;

        let mut cohort = CohortPositions::default();
        for (wallet, result) in wallets.iter().zip(results) {
            match result {
                Ok(positions) => cohort.wallets.push(positions),
                Err(e) => {
                    tracing::warn!(wallet = %wallet, error = %e, "Excluding wallet from run");
                    cohort.wallets_failed += 1;
                }
            }
        }

        tracing::info!(
            wallets_ok = cohort.wallets.len(),
            wallets_failed = cohort.wallets_failed,
            duration_ms = %start.elapsed().as_millis(),
            "Fetched cohort positions"
        );
        cohort
    }

    async fn fetch_with_retry(&self, wallet: &Wallet) -> Result<WalletPositions, FetchError> {
        let timeout = self.settings.wallet_timeout;
        let retry = self.settings.retry;
        let mut attempt = 0;

        loop {
            let error = match tokio::time::timeout(timeout, self.source.fetch_positions(wallet)).await {
                Ok(Ok(positions)) => return Ok(positions),
                Ok(Err(e)) => e,
                Err(_) => FetchError::Timeout(timeout),
            };

            if !error.is_retryable() || attempt >= retry.attempts {
                return Err(error);
            }

            let delay = retry.delay(attempt);
            tracing::debug!(
                wallet = %wallet.short(),
                attempt = attempt + 1,
                delay_ms = %delay.as_millis(),
                error = %error,
                "Retrying fetch"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
