use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use hyperindex_core::{Cadence, ScheduleConfig, Tier};
use hyperindex_store::{BackupPolicy, RetentionPolicy, StoreOptions};
use serde::Deserialize;

use crate::logging::LoggingConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub exchange: ExchangeConfig,
    pub fetch: FetchConfig,
    pub cohort: CohortConfig,
    pub store: StoreConfig,
    pub aggregation: AggregationConfig,
    pub schedule: SchedulerConfig,
    pub http: HttpConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExchangeConfig {
    pub api_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub max_concurrency: usize,
    pub requests_per_second: u32,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CohortConfig {
    pub wallets_file: PathBuf,
    #[serde(default)]
    pub rebalanced_at: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    pub max_backups: usize,
    #[serde(default)]
    pub max_backup_age_days: Option<i64>,
    pub max_history_points: usize,
    pub max_hourly_points: usize,
    pub lock_stale_secs: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AggregationConfig {
    pub min_asset_notional: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(flatten)]
    pub cadence: ScheduleConfig,
    pub max_consecutive_persistence_failures: u32,
    pub run_on_start: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub enabled: bool,
    pub addr: String,
}

/// Values given on the command line, applied over every other source.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub config_file: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub tier: Option<Tier>,
}

impl AppConfig {
    pub fn load(overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            // Start with default values
            .set_default("exchange.api_url", crate::client::HYPERLIQUID_API_URL)?
            .set_default("fetch.timeout_secs", 10)?
            .set_default("fetch.max_concurrency", 8)?
            .set_default("fetch.requests_per_second", 10)?
            .set_default("fetch.retry_attempts", 3)?
            .set_default("fetch.retry_backoff_ms", 1000)?
            .set_default("cohort.wallets_file", "config/wallets.txt")?
            .set_default("store.data_dir", "data")?
            .set_default("store.max_backups", 5)?
            .set_default("store.max_history_points", 2000)?
            .set_default("store.max_hourly_points", 2000)?
            .set_default("store.lock_stale_secs", 3600)?
            .set_default("aggregation.min_asset_notional", 0.0)?
            .set_default("schedule.tier", "standard")?
            .set_default("schedule.max_consecutive_persistence_failures", 3)?
            .set_default("schedule.run_on_start", true)?
            .set_default("http.enabled", false)?
            .set_default("http.addr", "127.0.0.1:8090")?
            .set_default("logging.level", "hyperindex=info")?
            .set_default("logging.format", "pretty")?;

        // An explicit file must exist; the conventional ones are optional
        builder = match &overrides.config_file {
            Some(path) => builder.add_source(File::from(path.as_path()).required(true)),
            None => builder
                .add_source(File::with_name("config/default").required(false))
                .add_source(File::with_name("config/local").required(false)),
        };

        // Override with environment variables (HYPERINDEX__SCHEDULE__TIER, etc.)
        builder = builder.add_source(
            Environment::with_prefix("HYPERINDEX")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(dir) = &overrides.data_dir {
            builder = builder.set_override("store.data_dir", dir.to_string_lossy().into_owned())?;
        }
        if let Some(tier) = overrides.tier {
            let tier = match tier {
                Tier::Standard => "standard",
                Tier::Fast => "fast",
            };
            builder = builder.set_override("schedule.tier", tier)?;
        }

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, cadence) in [
            ("schedule.standard", &self.schedule.cadence.standard),
            ("schedule.fast", &self.schedule.cadence.fast),
        ] {
            cadence
                .validate()
                .map_err(|e| ConfigError::Message(format!("{}: {}", name, e)))?;
        }
        if self.fetch.max_concurrency == 0 {
            return Err(ConfigError::Message("fetch.max_concurrency must be at least 1".into()));
        }
        if self.fetch.requests_per_second == 0 {
            return Err(ConfigError::Message("fetch.requests_per_second must be at least 1".into()));
        }
        if self.store.max_history_points == 0 {
            return Err(ConfigError::Message("store.max_history_points must be at least 1".into()));
        }
        if self.schedule.max_consecutive_persistence_failures == 0 {
            return Err(ConfigError::Message(
                "schedule.max_consecutive_persistence_failures must be at least 1".into(),
            ));
        }
        if self.store.lock_stale_secs <= 0 || chrono::Duration::try_seconds(self.store.lock_stale_secs).is_none() {
            return Err(ConfigError::Message(
                "store.lock_stale_secs must be a positive number of seconds".into(),
            ));
        }
        if let Some(days) = self.store.max_backup_age_days {
            if days <= 0 || chrono::Duration::try_days(days).is_none() {
                return Err(ConfigError::Message(
                    "store.max_backup_age_days must be a positive number of days".into(),
                ));
            }
        }
        if !self.aggregation.min_asset_notional.is_finite() || self.aggregation.min_asset_notional < 0.0 {
            return Err(ConfigError::Message(
                "aggregation.min_asset_notional must be a non-negative number".into(),
            ));
        }
        Ok(())
    }

    pub fn cadence(&self) -> &Cadence {
        self.schedule.cadence.active()
    }

    pub fn data_dir(&self) -> &Path {
        &self.store.data_dir
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            backups: BackupPolicy {
                max_backups: self.store.max_backups,
                max_age: self.store.max_backup_age_days.and_then(chrono::Duration::try_days),
            },
            retention: RetentionPolicy {
                max_points: self.store.max_history_points,
                max_hourly_points: self.store.max_hourly_points,
            },
        }
    }

    pub fn lock_stale_after(&self) -> chrono::Duration {
        chrono::Duration::try_seconds(self.store.lock_stale_secs).unwrap_or(chrono::Duration::hours(1))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.timeout_secs)
    }

    pub fn requests_per_second(&self) -> NonZeroU32 {
        NonZeroU32::new(self.fetch.requests_per_second).unwrap_or(NonZeroU32::MIN)
    }
}
