use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, trace, warn};

use crate::actors::MaintenanceSettings;
use crate::alerts::AlertPolicy;
use crate::api::ApiConfig;

const ENV_BIND: &str = "PROBEWATCH_BIND";
const ENV_API_KEYS: &str = "PROBEWATCH_API_KEYS";
const ENV_DB: &str = "PROBEWATCH_DB";

/// Hub configuration, every section optional
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub alerts: AlertsConfig,

    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(default = "default_sqlite_path")]
    pub path: PathBuf,

    /// Samples older than this are deleted; `None` keeps everything
    #[serde(default)]
    pub retention_days: Option<u32>,

    /// Active servers silent for longer than this are marked inactive
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_sqlite_path(),
            retention_days: None,
            stale_after_secs: default_stale_after_secs(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct AlertsConfig {
    /// Minimum seconds between resolving an alert and re-opening it
    #[serde(default)]
    pub cooldown_secs: u64,
}

impl AlertsConfig {
    pub fn policy(&self) -> anyhow::Result<AlertPolicy> {
        let cooldown = seconds(self.cooldown_secs)
            .with_context(|| format!("alerts.cooldown_secs {} is out of range", self.cooldown_secs))?;
        Ok(AlertPolicy { cooldown })
    }
}

/// Seconds as a `chrono::Duration`, `None` if they do not fit
pub(crate) fn seconds(secs: u64) -> Option<chrono::Duration> {
    i64::try_from(secs).ok().and_then(chrono::Duration::try_seconds)
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_storage_timeout_secs")]
    pub storage_timeout_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            storage_timeout_secs: default_storage_timeout_secs(),
        }
    }
}

impl IngestConfig {
    pub fn storage_timeout(&self) -> Duration {
        Duration::from_secs(self.storage_timeout_secs)
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./probewatch.db")
}

fn default_stale_after_secs() -> u64 {
    300
}

fn default_maintenance_interval_secs() -> u64 {
    60
}

fn default_storage_timeout_secs() -> u64 {
    10
}

impl HubConfig {
    /// Check the values that serde cannot, such as durations that overflow
    pub fn validate(&self) -> anyhow::Result<()> {
        self.alerts.policy()?;
        MaintenanceSettings::try_from(&self.storage)?;
        Ok(())
    }

    /// Apply `PROBEWATCH_*` environment overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(bind) = lookup(ENV_BIND) {
            match bind.parse() {
                Ok(addr) => self.api.bind_addr = addr,
                Err(e) => warn!("ignoring {ENV_BIND}={bind}: {e}"),
            }
        }

        if let Some(keys) = lookup(ENV_API_KEYS) {
            self.api.api_keys = keys
                .split(',')
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_string)
                .collect();
            debug!("loaded {} api keys from environment", self.api.api_keys.len());
        }

        if let Some(path) = lookup(ENV_DB) {
            self.storage.path = PathBuf::from(path);
        }
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<HubConfig> {
    let file_content = std::fs::read_to_string(path)?;
    let config: HubConfig = serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))?;
    config
        .validate()
        .context("Invalid configuration file provided")?;
    trace!("loaded config: {config:?}");
    Ok(config)
}
