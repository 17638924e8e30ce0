//! Configuration module for Cairn.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::cost::{default_tiers, StorageTier, StorageTiers};
use crate::retry::Backoff;
use crate::{CairnError, Result};

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/cairn.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Object storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding stored objects.
    #[serde(default = "default_storage_root")]
    pub root: String,
    /// Base URL presigned links are issued under.
    #[serde(default = "default_public_url")]
    pub public_url: String,
    /// HMAC key for presigned URLs.
    #[serde(default)]
    pub signing_key: String,
    /// Lifetime of presigned URLs in seconds.
    #[serde(default = "default_presigned_url_validity")]
    pub presigned_url_validity_secs: u64,
    /// Maximum keys requested per listing page.
    #[serde(default = "default_list_page_size")]
    pub list_page_size: usize,
}

fn default_storage_root() -> String {
    "data/objects".to_string()
}

fn default_public_url() -> String {
    "http://localhost:8080/objects/".to_string()
}

fn default_presigned_url_validity() -> u64 {
    3600
}

fn default_list_page_size() -> usize {
    crate::blob::DEFAULT_PAGE_SIZE
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            public_url: default_public_url(),
            signing_key: String::new(),
            presigned_url_validity_secs: default_presigned_url_validity(),
            list_page_size: default_list_page_size(),
        }
    }
}

impl StorageConfig {
    /// Presigned URL lifetime.
    pub fn url_validity(&self) -> Duration {
        Duration::from_secs(self.presigned_url_validity_secs)
    }
}

/// Local download cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Whether downloaded content is cached on local disk.
    #[serde(default)]
    pub enabled: bool,
    /// Directory holding cached files.
    #[serde(default = "default_cache_directory")]
    pub directory: String,
    /// Base URL cache download links are issued under.
    #[serde(default = "default_cache_base_url")]
    pub base_url: String,
    /// Lifetime of cache download tokens in seconds.
    #[serde(default = "default_token_validity")]
    pub token_validity_secs: u64,
}

fn default_cache_directory() -> String {
    "data/cache".to_string()
}

fn default_cache_base_url() -> String {
    "http://localhost:8080/".to_string()
}

fn default_token_validity() -> u64 {
    3600
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: default_cache_directory(),
            base_url: default_cache_base_url(),
            token_validity_secs: default_token_validity(),
        }
    }
}

impl CacheConfig {
    /// Cache token lifetime.
    pub fn token_validity(&self) -> Duration {
        Duration::from_secs(self.token_validity_secs)
    }
}

/// Task pool configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PoolConfig {
    /// Number of tasks allowed to run at once. 0 uses the available parallelism.
    #[serde(default)]
    pub size: usize,
}

/// Listing filter configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterConfig {
    /// Glob patterns for paths hidden from listings.
    #[serde(default)]
    pub excludes: Vec<String>,
}

/// Sizer job configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SizerConfig {
    /// Whether the job runs at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Run one pass before scheduling.
    #[serde(default)]
    pub run_on_startup: bool,
    /// Seconds between passes. 0 disables the schedule.
    #[serde(default = "default_sizer_interval")]
    pub interval_secs: u64,
    /// Attempts per store call.
    #[serde(default = "default_backoff_max_retries")]
    pub backoff_max_retries: u32,
    /// Pause after a failed attempt, in milliseconds.
    #[serde(default = "default_backoff_throttle")]
    pub backoff_throttle_ms: u64,
    /// Cost tiers, ascending by days since last access.
    #[serde(default = "default_tiers")]
    pub tiers: Vec<StorageTier>,
}

fn default_true() -> bool {
    true
}

fn default_sizer_interval() -> u64 {
    86400
}

fn default_backoff_max_retries() -> u32 {
    5
}

fn default_backoff_throttle() -> u64 {
    1000
}

impl Default for SizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            run_on_startup: false,
            interval_secs: default_sizer_interval(),
            backoff_max_retries: default_backoff_max_retries(),
            backoff_throttle_ms: default_backoff_throttle(),
            tiers: default_tiers(),
        }
    }
}

impl SizerConfig {
    /// Retry settings for store calls.
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            self.backoff_max_retries,
            Duration::from_millis(self.backoff_throttle_ms),
        )
    }

    /// Schedule interval, if any.
    pub fn interval(&self) -> Option<Duration> {
        schedule(self.enabled, self.interval_secs)
    }
}

/// Reaper job configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ReaperConfig {
    /// Whether the job runs at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Run one pass before scheduling.
    #[serde(default)]
    pub run_on_startup: bool,
    /// Seconds between passes. 0 disables the schedule.
    #[serde(default = "default_reaper_interval")]
    pub interval_secs: u64,
    /// Attempts per store call.
    #[serde(default = "default_backoff_max_retries")]
    pub backoff_max_retries: u32,
    /// Pause after a failed attempt, in milliseconds.
    #[serde(default = "default_backoff_throttle")]
    pub backoff_throttle_ms: u64,
    /// Pause after each object examined, in milliseconds.
    #[serde(default = "default_iteration_throttle")]
    pub iteration_throttle_ms: u64,
}

fn default_reaper_interval() -> u64 {
    604800
}

fn default_iteration_throttle() -> u64 {
    50
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            run_on_startup: false,
            interval_secs: default_reaper_interval(),
            backoff_max_retries: default_backoff_max_retries(),
            backoff_throttle_ms: default_backoff_throttle(),
            iteration_throttle_ms: default_iteration_throttle(),
        }
    }
}

impl ReaperConfig {
    /// Retry settings for store calls.
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            self.backoff_max_retries,
            Duration::from_millis(self.backoff_throttle_ms),
        )
    }

    /// Pause between objects.
    pub fn iteration_throttle(&self) -> Duration {
        Duration::from_millis(self.iteration_throttle_ms)
    }

    /// Schedule interval, if any.
    pub fn interval(&self) -> Option<Duration> {
        schedule(self.enabled, self.interval_secs)
    }
}

fn schedule(enabled: bool, interval_secs: u64) -> Option<Duration> {
    if enabled && interval_secs > 0 {
        Some(Duration::from_secs(interval_secs))
    } else {
        None
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/cairn.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Object storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Local download cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Task pool configuration.
    #[serde(default)]
    pub pool: PoolConfig,
    /// Listing filter configuration.
    #[serde(default)]
    pub filter: FilterConfig,
    /// Sizer job configuration.
    #[serde(default)]
    pub sizer: SizerConfig,
    /// Reaper job configuration.
    #[serde(default)]
    pub reaper: ReaperConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(CairnError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| CairnError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `CAIRN_SIGNING_KEY`: Override the presigned URL signing key
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("CAIRN_SIGNING_KEY") {
            if !key.is_empty() {
                self.storage.signing_key = key;
            }
        }
    }

    /// Validate the configuration.
    ///
    /// Returns an error if:
    /// - The signing key is not set
    /// - Presigned URLs or cache tokens would expire immediately
    /// - A job would never attempt its store calls
    /// - The sizer tiers are empty, unsorted or negative
    pub fn validate(&self) -> Result<()> {
        if self.storage.signing_key.is_empty() {
            return Err(CairnError::Config(
                "signing_key is not set. \
                 Set it in config.toml or via CAIRN_SIGNING_KEY environment variable."
                    .to_string(),
            ));
        }
        if self.storage.presigned_url_validity_secs == 0 {
            return Err(CairnError::Config(
                "presigned_url_validity_secs must be greater than 0".to_string(),
            ));
        }
        if self.storage.list_page_size == 0 {
            return Err(CairnError::Config(
                "list_page_size must be greater than 0".to_string(),
            ));
        }
        if self.cache.enabled && self.cache.token_validity_secs == 0 {
            return Err(CairnError::Config(
                "cache token_validity_secs must be greater than 0".to_string(),
            ));
        }
        if self.sizer.backoff_max_retries == 0 {
            return Err(CairnError::Config(
                "sizer backoff_max_retries must be greater than 0".to_string(),
            ));
        }
        if self.reaper.backoff_max_retries == 0 {
            return Err(CairnError::Config(
                "reaper backoff_max_retries must be greater than 0".to_string(),
            ));
        }
        StorageTiers::new(self.sizer.tiers.clone())
            .map_err(|e| CairnError::Config(e.to_string()))?;
        Ok(())
    }
}
