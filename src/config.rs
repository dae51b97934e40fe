use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::catalog::cache::DEFAULT_FRESHNESS_SECS;
use crate::catalog::source::DEFAULT_CATALOG_URL;

const MIN_SYNC_POLL_MS: u64 = 50;
/// Largest window a `chrono::Duration` can hold at millisecond precision.
const MAX_CACHE_FRESHNESS_SECS: i64 = i64::MAX / 1000;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_catalog_url")]
    pub catalog_url: String,
    #[serde(default = "default_storage_dir")]
    pub storage_dir: String,
    #[serde(default = "default_persistent_storage")]
    pub persistent_storage: bool,
    #[serde(default = "default_cache_freshness_secs")]
    pub cache_freshness_secs: i64,
    #[serde(default = "default_sync_poll_ms")]
    pub sync_poll_ms: u64,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_catalog_url() -> String {
    DEFAULT_CATALOG_URL.to_string()
}
fn default_storage_dir() -> String {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tabwords")
        .join("storage")
        .to_string_lossy()
        .to_string()
}
fn default_persistent_storage() -> bool {
    true
}
fn default_cache_freshness_secs() -> i64 {
    DEFAULT_FRESHNESS_SECS
}
fn default_sync_poll_ms() -> u64 {
    500
}
fn default_log_filter() -> String {
    "warn".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            catalog_url: default_catalog_url(),
            storage_dir: default_storage_dir(),
            persistent_storage: default_persistent_storage(),
            cache_freshness_secs: default_cache_freshness_secs(),
            sync_poll_ms: default_sync_poll_ms(),
            log_filter: default_log_filter(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if path.exists() {
            let content = fs::read_to_string(&path)?;
            let mut config: Config = toml::from_str(&content)?;
            config.normalize();
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tabwords")
            .join("config.toml")
    }

    /// Storage location, or `None` when only the in-memory store should be used.
    pub fn storage_path(&self) -> Option<PathBuf> {
        self.persistent_storage
            .then(|| PathBuf::from(&self.storage_dir))
    }

    pub fn sync_poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.sync_poll_ms)
    }

    pub fn cache_freshness(&self) -> chrono::Duration {
        chrono::Duration::try_seconds(self.cache_freshness_secs)
            .unwrap_or_else(|| chrono::Duration::seconds(DEFAULT_FRESHNESS_SECS))
    }

    /// Repair values an edited config file can get wrong.
    pub fn normalize(&mut self) {
        if self.catalog_url.trim().is_empty() {
            self.catalog_url = default_catalog_url();
        }
        if self.storage_dir.trim().is_empty() {
            self.storage_dir = default_storage_dir();
        }
        if self.cache_freshness_secs <= 0 {
            self.cache_freshness_secs = default_cache_freshness_secs();
        }
        self.cache_freshness_secs = self.cache_freshness_secs.min(MAX_CACHE_FRESHNESS_SECS);
        self.sync_poll_ms = self.sync_poll_ms.max(MIN_SYNC_POLL_MS);
        if self.log_filter.trim().is_empty() {
            self.log_filter = default_log_filter();
        }
    }
}
