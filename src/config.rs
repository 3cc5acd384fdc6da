//! Configuration file parser for ~/.config/feedwatch/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are accepted but logged, since they are usually typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::feed::{FetchOptions, ParseOptions, DEFAULT_MAX_SUMMARY_LENGTH};
use crate::monitor::MonitorOptions;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds the maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// User-Agent sent with every request.
    pub user_agent: String,
    pub request_timeout_secs: u64,
    /// Send `Connection: close` instead of keeping connections alive.
    pub connection_close: bool,
    pub max_feed_bytes: usize,

    /// Interval for `auto` feeds until their cadence is known.
    ///
    /// A zero interval here or below disables automatic checks for the
    /// matching feeds (manual refresh only).
    pub check_interval_minutes: u64,
    /// Interval for `high` feeds, and the fastest `auto` will poll.
    pub high_frequency_minutes: u64,
    /// Interval for `low` feeds, and the slowest `auto` will poll.
    pub low_frequency_minutes: u64,
    pub initial_delay_secs: u64,
    /// Extra attempts after a failed check.
    pub retry_count: u32,
    pub retry_interval_secs: u64,

    pub max_summary_length: usize,

    /// Defaults to `cache/` under the config directory.
    pub cache_dir: Option<PathBuf>,
    /// Feeds whose items stay in memory at once.
    pub cache_capacity: usize,
    /// Never write the cache back on shutdown.
    pub read_only_cache: bool,

    /// Defaults to `feeds.json` under the config directory.
    pub feeds_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let fetch = FetchOptions::default();
        Self {
            user_agent: fetch.user_agent,
            request_timeout_secs: fetch.timeout.as_secs(),
            connection_close: fetch.connection_close,
            max_feed_bytes: fetch.max_body_bytes,
            check_interval_minutes: 60,
            high_frequency_minutes: 15,
            low_frequency_minutes: 360,
            initial_delay_secs: 0,
            retry_count: 3,
            retry_interval_secs: 30,
            max_summary_length: DEFAULT_MAX_SUMMARY_LENGTH,
            cache_dir: None,
            cache_capacity: 32,
            read_only_cache: false,
            feeds_file: None,
        }
    }
}

const KNOWN_KEYS: [&str; 15] = [
    "user_agent",
    "request_timeout_secs",
    "connection_close",
    "max_feed_bytes",
    "check_interval_minutes",
    "high_frequency_minutes",
    "low_frequency_minutes",
    "initial_delay_secs",
    "retry_count",
    "retry_interval_secs",
    "max_summary_length",
    "cache_dir",
    "cache_capacity",
    "read_only_cache",
    "feeds_file",
];

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML or wrong types → `Err(ConfigError::Parse)` with line info
    /// - Unknown keys → accepted, logged as a warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check the size before reading so a huge file cannot exhaust memory
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
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            check_interval_minutes = config.check_interval_minutes,
            cache_capacity = config.cache_capacity,
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            user_agent: self.user_agent.clone(),
            timeout: Duration::from_secs(self.request_timeout_secs),
            connection_close: self.connection_close,
            max_body_bytes: self.max_feed_bytes,
        }
    }

    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            max_summary_length: self.max_summary_length,
        }
    }

    /// Scheduling settings. Network and power conditions are left for the
    /// caller to attach.
    pub fn monitor_options(&self) -> MonitorOptions {
        let minutes = |m: u64| Duration::from_secs(m.saturating_mul(60));
        MonitorOptions {
            check_interval: minutes(self.check_interval_minutes),
            high_interval: minutes(self.high_frequency_minutes),
            low_interval: minutes(self.low_frequency_minutes),
            initial_delay: Duration::from_secs(self.initial_delay_secs),
            retry_count: self.retry_count,
            retry_interval: Duration::from_secs(self.retry_interval_secs),
            parse: self.parse_options(),
            ..MonitorOptions::default()
        }
    }

    pub fn cache_dir(&self, config_dir: &Path) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| config_dir.join("cache"))
    }

    pub fn feeds_file(&self, config_dir: &Path) -> PathBuf {
        self.feeds_file
            .clone()
            .unwrap_or_else(|| config_dir.join("feeds.json"))
    }
}
