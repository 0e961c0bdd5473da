use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use hyperindex_core::{Cadence, ScheduleConfig, Tier};
use serde::Deserialize;

/// The sections of the shared HyperIndex configuration the monitor reads.
#[derive(Debug, Deserialize, Clone)]
pub struct MonitorConfig {
    pub store: StoreSection,
    pub schedule: ScheduleConfig,
    pub monitor: MonitorSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreSection {
    pub data_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MonitorSection {
    pub refresh_secs: u64,
    pub color: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSection {
    pub level: String,
}

impl MonitorConfig {
    pub fn load(
        config_file: Option<PathBuf>,
        data_dir: Option<PathBuf>,
        tier: Option<Tier>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("store.data_dir", "data")?
            .set_default("schedule.tier", "standard")?
            .set_default("monitor.refresh_secs", 30)?
            .set_default("monitor.color", true)?
            // Keep log lines from tearing through the dashboard
            .set_default("logging.level", "warn")?;

        builder = match config_file {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder
                .add_source(File::with_name("config/default").required(false))
                .add_source(File::with_name("config/local").required(false)),
        };
        builder = builder.add_source(
            Environment::with_prefix("HYPERINDEX")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(dir) = data_dir {
            builder = builder.set_override("store.data_dir", dir.to_string_lossy().into_owned())?;
        }
        if let Some(tier) = tier {
            let tier = match tier {
                Tier::Standard => "standard",
                Tier::Fast => "fast",
            };
            builder = builder.set_override("schedule.tier", tier)?;
        }

        let config: MonitorConfig = builder.build()?.try_deserialize()?;
        config
            .cadence()
            .validate()
            .map_err(|e| ConfigError::Message(format!("schedule: {}", e)))?;
        Ok(config)
    }

    pub fn cadence(&self) -> &Cadence {
        self.schedule.active()
    }

    pub fn refresh(&self) -> Duration {
        Duration::from_secs(self.monitor.refresh_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.toml");
        std::fs::write(&path, "[monitor]\nrefresh_secs = 5\n").unwrap();

        let config = MonitorConfig::load(Some(path), Some(PathBuf::from("/srv/index")), Some(Tier::Fast)).unwrap();

        assert_eq!(config.refresh(), Duration::from_secs(5));
        assert_eq!(config.store.data_dir, PathBuf::from("/srv/index"));
        assert_eq!(config.cadence(), &Cadence::fast());
        assert!(config.monitor.color);
        assert_eq!(config.logging.level, "warn");
    }
}
