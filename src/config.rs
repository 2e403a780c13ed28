//! Configuration file parser for ~/.config/kanjisync/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as warnings, since they are
//! usually typos.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::api::DEFAULT_BASE_URL;
use crate::sync::SyncConfig;

/// Environment variable holding the API key. Takes precedence over the file.
pub const API_KEY_ENV: &str = "WANIKANI_API_KEY";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid api_base_url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// The Debug impl masks `api_key`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the remote API (collections are resolved relative to it).
    pub api_base_url: String,

    /// API token (alternative to the WANIKANI_API_KEY env var).
    pub api_key: Option<String>,

    /// Minimum seconds between two fetches of the same category. 0 = always fetch.
    pub min_fetch_interval_secs: u64,

    /// Page cap per category update.
    pub max_pages: usize,

    /// Categories fetched concurrently by `sync` without `--category`.
    pub sync_concurrency: usize,

    /// Default number of search results.
    pub search_limit: u32,

    /// Store location. Defaults to `kanjisync.db` in the config directory.
    pub database_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let sync = SyncConfig::default();
        Self {
            api_base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            min_fetch_interval_secs: 60,
            max_pages: sync.max_pages,
            sync_concurrency: sync.concurrency,
            search_limit: 20,
            database_path: None,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_base_url", &self.api_base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("min_fetch_interval_secs", &self.min_fetch_interval_secs)
            .field("max_pages", &self.max_pages)
            .field("sync_concurrency", &self.sync_concurrency)
            .field("search_limit", &self.search_limit)
            .field("database_path", &self.database_path)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 7] = [
        "api_base_url",
        "api_key",
        "min_fetch_interval_secs",
        "max_pages",
        "sync_concurrency",
        "search_limit",
        "database_path",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading so a corrupted file cannot exhaust memory.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        config.base_url()?;
        tracing::info!(
            path = %path.display(),
            api_base_url = %config.api_base_url,
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.api_base_url).map_err(|e| ConfigError::InvalidUrl {
            url: self.api_base_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl {
                url: self.api_base_url.clone(),
                reason: "scheme must be http or https".into(),
            });
        }
        Ok(url)
    }

    /// The API key, preferring the environment over the file.
    pub fn api_key(&self) -> Option<SecretString> {
        self.api_key_with_env(std::env::var(API_KEY_ENV).ok())
    }

    fn api_key_with_env(&self, env_value: Option<String>) -> Option<SecretString> {
        env_value
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.api_key.clone().filter(|v| !v.trim().is_empty()))
            .map(|v| SecretString::from(v.trim().to_string()))
    }

    pub fn min_fetch_interval(&self) -> Duration {
        Duration::from_secs(self.min_fetch_interval_secs)
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            max_pages: self.max_pages.max(1),
            concurrency: self.sync_concurrency.max(1),
            ..SyncConfig::default()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
