//! Configuration file parser for ~/.config/feedstash/config.toml.
//!
//! The config file is optional. A missing or empty file yields
//! `Config::default()`; unknown keys are accepted but logged as likely typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::backend::{BackendConfig, DEFAULT_CACHE_RETENTION};
use crate::storage::{
    read_store_file, CacheSettings, PersistError, DEFAULT_FETCH_TIMEOUT, DEFAULT_STALE_AFTER,
};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    /// Unreadable, oversized (SEC-014) or not UTF-8
    #[error("Failed to read config file: {0}")]
    Read(#[from] PersistError),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),
}

// ============================================================================
// Configuration
// ============================================================================

const KNOWN_KEYS: [&str; 5] = [
    "feeds_path",
    "cache_path",
    "stale_after_minutes",
    "fetch_timeout_secs",
    "cache_retention_hours",
];

/// Top-level application configuration.
///
/// Every key is optional. Relative store paths are taken relative to the
/// config directory.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Feed directory file (default `feeds.toml` in the config directory).
    pub feeds_path: Option<PathBuf>,

    /// Article cache file (default `cache.json` in the config directory).
    pub cache_path: Option<PathBuf>,

    /// Minutes before a cached feed is refetched.
    pub stale_after_minutes: u64,

    /// Upper bound on one feed fetch, in seconds.
    pub fetch_timeout_secs: u64,

    /// Cache entries older than this many hours are dropped at shutdown.
    pub cache_retention_hours: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feeds_path: None,
            cache_path: None,
            stale_after_minutes: DEFAULT_STALE_AFTER.as_secs() / 60,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT.as_secs(),
            cache_retention_hours: DEFAULT_CACHE_RETENTION.as_secs() / 3600,
        }
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// A missing or blank file gives the defaults. Unknown keys are logged
    /// and otherwise ignored.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match read_store_file(path, Self::MAX_FILE_SIZE).await? {
            Some(content) if !content.trim().is_empty() => content,
            _ => {
                tracing::debug!(path = %path.display(), "No config, using defaults");
                return Ok(Self::default());
            }
        };

        let table: toml::Table = content.parse()?;
        for key in table.keys().filter(|k| !KNOWN_KEYS.contains(&k.as_str())) {
            tracing::warn!(key = %key, "Unknown key in config file, ignoring");
        }

        let config: Config = toml::Value::Table(table).try_into()?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Resolve store paths against `config_dir` and build the backend setup.
    pub fn backend_config(&self, config_dir: &Path) -> BackendConfig {
        let resolve = |configured: &Option<PathBuf>, default: &str| match configured {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => config_dir.join(p),
            None => config_dir.join(default),
        };

        let mut backend = BackendConfig::new(
            resolve(&self.feeds_path, "feeds.toml"),
            resolve(&self.cache_path, "cache.json"),
        );
        backend.cache = CacheSettings {
            stale_after: Duration::from_secs(self.stale_after_minutes.saturating_mul(60)),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs.max(1)),
        };
        backend.cache_retention =
            Duration::from_secs(self.cache_retention_hours.saturating_mul(60 * 60));
        backend
    }
}

// ============================================================================
// Tests
// ============================================================================
