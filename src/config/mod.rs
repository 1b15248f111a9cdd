//! Configuration loading for the catalog sync service.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `CATALOG_SYNC_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use utoipa::ToSchema;

use crate::models::sync_run::DispatchMode;
use crate::source::ShopifyConfig;
use crate::source::timestamp::parse_timezone;

/// Prefix shared by every environment variable the service reads.
pub const ENV_PREFIX: &str = "CATALOG_SYNC_";

/// Application configuration derived from `CATALOG_SYNC_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub retry_policy: RetryPolicyConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    #[serde(default)]
    pub source: SourceConfig,
}

/// Defaults applied to sync runs whose request leaves an option unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SyncConfig {
    /// Ids per dispatched batch (default: 250)
    #[serde(default = "default_sync_batch_size")]
    pub batch_size: usize,
    /// Item details fetched per sub-batch inside a batch (default: 25)
    #[serde(default = "default_sync_detail_batch_size")]
    pub detail_batch_size: usize,
    /// Concurrent detail fetches per sub-batch (default: 5)
    #[serde(default = "default_sync_detail_concurrency")]
    pub detail_concurrency: usize,
    /// A run in progress for longer than this is considered abandoned (default: 60)
    #[serde(default = "default_sync_stale_after_minutes")]
    pub stale_after_minutes: u64,
    /// Enumeration stops once it yields this many times the source's own count (default: 2.0)
    #[serde(default = "default_sync_runaway_multiplier")]
    pub runaway_multiplier: f64,
    /// Hard-delete soft-deleted items older than this after a full run; unset keeps them forever
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purge_deleted_after_days: Option<u32>,
    /// IANA zone used to render the incremental `updated_at_min` filter
    #[serde(default = "default_sync_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub dispatch: DispatchMode,
}

/// Queue worker runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct QueueConfig {
    #[serde(default = "default_queue_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_queue_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_queue_claim_batch")]
    pub claim_batch: usize,
    #[serde(default = "default_queue_max_attempts")]
    pub max_attempts: u32,
    /// A task running longer than this is abandoned and retried
    #[serde(default = "default_queue_max_run_seconds")]
    pub max_run_seconds: u64,
}

/// Backoff policy for failed queue tasks
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RetryPolicyConfig {
    /// Base retry interval in seconds (default: 5)
    ///
    /// Retries use exponential backoff: base_seconds * 2^prior_failures.
    ///
    /// Environment variable: `CATALOG_SYNC_RETRY_BASE_SECONDS`
    #[serde(default = "default_retry_base_seconds")]
    #[schema(example = 5)]
    pub base_seconds: u64,

    /// Maximum retry interval in seconds (default: 900). Must be >= base_seconds.
    ///
    /// Environment variable: `CATALOG_SYNC_RETRY_MAX_SECONDS`
    #[serde(default = "default_retry_max_seconds")]
    #[schema(example = 900)]
    pub max_seconds: u64,

    /// Jitter factor (default: 0.1, range: 0.0-1.0)
    ///
    /// Environment variable: `CATALOG_SYNC_RETRY_JITTER_FACTOR`
    #[serde(default = "default_retry_jitter_factor")]
    #[schema(example = 0.1, minimum = 0.0, maximum = 1.0)]
    pub jitter_factor: f64,
}

/// Stale-run sweeper settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SweeperConfig {
    #[serde(default = "default_sweeper_tick_seconds")]
    pub tick_seconds: u64,
    /// Running queue tasks older than this are returned to the queue
    #[serde(default = "default_sweeper_stalled_task_seconds")]
    pub stalled_task_seconds: u64,
}

/// Remote catalog API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SourceConfig {
    #[serde(default = "default_source_api_version")]
    pub api_version: String,
    #[serde(default = "default_source_page_size")]
    pub page_size: u32,
    #[serde(default = "default_source_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_source_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_source_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize {
                field: "batch size",
                value: self.batch_size,
            });
        }
        if self.detail_batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize {
                field: "detail batch size",
                value: self.detail_batch_size,
            });
        }
        if self.detail_concurrency == 0 || self.detail_concurrency > 64 {
            return Err(ConfigError::InvalidDetailConcurrency {
                value: self.detail_concurrency,
            });
        }
        if self.stale_after_minutes == 0 {
            return Err(ConfigError::InvalidStaleThreshold {
                value: self.stale_after_minutes,
            });
        }
        if !(self.runaway_multiplier >= 1.0) {
            return Err(ConfigError::InvalidRunawayMultiplier {
                value: self.runaway_multiplier,
            });
        }
        if self.purge_deleted_after_days == Some(0) {
            return Err(ConfigError::InvalidPurgeAge);
        }
        parse_timezone(&self.timezone).map_err(|_| ConfigError::InvalidTimezone {
            value: self.timezone.clone(),
        })?;
        Ok(())
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_ms < 10 {
            return Err(ConfigError::InvalidQueueTick { value: self.tick_ms });
        }
        if self.concurrency == 0 || self.claim_batch == 0 {
            return Err(ConfigError::InvalidQueueConcurrency {
                concurrency: self.concurrency,
                claim_batch: self.claim_batch,
            });
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidQueueMaxAttempts);
        }
        if self.max_run_seconds == 0 {
            return Err(ConfigError::InvalidQueueMaxRun);
        }
        Ok(())
    }
}

impl RetryPolicyConfig {
    /// Validate retry policy bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_seconds > self.max_seconds {
            return Err(ConfigError::InvalidRetryBounds {
                base: self.base_seconds,
                max: self.max_seconds,
            });
        }

        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::InvalidRetryJitter {
                value: self.jitter_factor,
            });
        }

        Ok(())
    }
}

impl SweeperConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_seconds == 0 || self.tick_seconds > 3600 {
            return Err(ConfigError::InvalidSweeperTick {
                value: self.tick_seconds,
            });
        }
        Ok(())
    }
}

impl SourceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 || self.page_size > 250 {
            return Err(ConfigError::InvalidSourcePageSize {
                value: self.page_size,
            });
        }
        if let Some(base) = &self.api_base
            && Url::parse(base).is_err()
        {
            return Err(ConfigError::InvalidSourceApiBase {
                value: base.clone(),
            });
        }
        Ok(())
    }

    pub fn shopify(&self) -> ShopifyConfig {
        ShopifyConfig {
            api_version: self.api_version.clone(),
            page_size: self.page_size,
            request_timeout_ms: self.request_timeout_ms,
            max_retries: self.max_retries,
            retry_base_delay_ms: self.retry_base_delay_ms,
            api_base: self.api_base.clone(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            sync: SyncConfig::default(),
            queue: QueueConfig::default(),
            retry_policy: RetryPolicyConfig::default(),
            sweeper: SweeperConfig::default(),
            source: SourceConfig::default(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_sync_batch_size(),
            detail_batch_size: default_sync_detail_batch_size(),
            detail_concurrency: default_sync_detail_concurrency(),
            stale_after_minutes: default_sync_stale_after_minutes(),
            runaway_multiplier: default_sync_runaway_multiplier(),
            purge_deleted_after_days: None,
            timezone: default_sync_timezone(),
            dispatch: DispatchMode::default(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_queue_tick_ms(),
            concurrency: default_queue_concurrency(),
            claim_batch: default_queue_claim_batch(),
            max_attempts: default_queue_max_attempts(),
            max_run_seconds: default_queue_max_run_seconds(),
        }
    }
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            base_seconds: default_retry_base_seconds(),
            max_seconds: default_retry_max_seconds(),
            jitter_factor: default_retry_jitter_factor(),
        }
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            tick_seconds: default_sweeper_tick_seconds(),
            stalled_task_seconds: default_sweeper_stalled_task_seconds(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            api_version: default_source_api_version(),
            page_size: default_source_page_size(),
            request_timeout_ms: default_source_request_timeout_ms(),
            max_retries: default_source_max_retries(),
            retry_base_delay_ms: default_source_retry_base_delay_ms(),
            api_base: None,
        }
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Returns a redacted JSON representation (database password is masked).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        config.database_url = redact_database_url(&config.database_url);
        serde_json::to_string_pretty(&config)
    }

    /// Validates every section of the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }
        if self.db_max_connections == 0 {
            return Err(ConfigError::InvalidDbMaxConnections);
        }

        self.sync.validate()?;
        self.queue.validate()?;
        self.retry_policy.validate()?;
        self.sweeper.validate()?;
        self.source.validate()?;

        Ok(())
    }
}

fn redact_database_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) if url.password().is_some() => {
            if url.set_password(Some("[REDACTED]")).is_ok() {
                url.to_string()
            } else {
                "[REDACTED]".to_string()
            }
        }
        Ok(_) => raw.to_string(),
        Err(_) => "[REDACTED]".to_string(),
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://catalog-sync.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_sync_batch_size() -> usize {
    250
}

fn default_sync_detail_batch_size() -> usize {
    25
}

fn default_sync_detail_concurrency() -> usize {
    5
}

fn default_sync_stale_after_minutes() -> u64 {
    60
}

fn default_sync_runaway_multiplier() -> f64 {
    2.0
}

fn default_sync_timezone() -> String {
    "UTC".to_string()
}

fn default_queue_tick_ms() -> u64 {
    1000
}

fn default_queue_concurrency() -> usize {
    4
}

fn default_queue_claim_batch() -> usize {
    10
}

fn default_queue_max_attempts() -> u32 {
    3
}

fn default_queue_max_run_seconds() -> u64 {
    600
}

fn default_retry_base_seconds() -> u64 {
    5
}

fn default_retry_max_seconds() -> u64 {
    900 // 15 minutes
}

fn default_retry_jitter_factor() -> f64 {
    0.1
}

fn default_sweeper_tick_seconds() -> u64 {
    60
}

fn default_sweeper_stalled_task_seconds() -> u64 {
    900
}

fn default_source_api_version() -> String {
    "2024-01".to_string()
}

fn default_source_page_size() -> u32 {
    250
}

fn default_source_request_timeout_ms() -> u64 {
    30_000
}

fn default_source_max_retries() -> u32 {
    3
}

fn default_source_retry_base_delay_ms() -> u64 {
    500
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("log format must be 'json' or 'pretty', got '{value}'")]
    InvalidLogFormat { value: String },
    #[error("database max connections must be at least 1")]
    InvalidDbMaxConnections,
    #[error("sync {field} must be at least 1, got {value}")]
    InvalidBatchSize { field: &'static str, value: usize },
    #[error("sync detail concurrency must be between 1 and 64, got {value}")]
    InvalidDetailConcurrency { value: usize },
    #[error("sync stale threshold must be at least 1 minute, got {value}")]
    InvalidStaleThreshold { value: u64 },
    #[error("sync runaway multiplier must be at least 1.0, got {value}")]
    InvalidRunawayMultiplier { value: f64 },
    #[error("purge age for deleted items must be at least 1 day")]
    InvalidPurgeAge,
    #[error("unknown sync timezone '{value}'")]
    InvalidTimezone { value: String },
    #[error("invalid sync dispatch mode '{value}'; expected 'inline' or 'queued'")]
    InvalidDispatchMode { value: String },
    #[error("queue tick must be at least 10ms, got {value}")]
    InvalidQueueTick { value: u64 },
    #[error(
        "queue concurrency ({concurrency}) and claim batch ({claim_batch}) must both be at least 1"
    )]
    InvalidQueueConcurrency {
        concurrency: usize,
        claim_batch: usize,
    },
    #[error("queue max attempts must be at least 1")]
    InvalidQueueMaxAttempts,
    #[error("queue max run seconds must be at least 1")]
    InvalidQueueMaxRun,
    #[error("retry base seconds ({base}) cannot be greater than max seconds ({max})")]
    InvalidRetryBounds { base: u64, max: u64 },
    #[error("retry jitter factor must be between 0.0 and 1.0, got {value}")]
    InvalidRetryJitter { value: f64 },
    #[error("sweeper tick must be between 1 and 3600 seconds, got {value}")]
    InvalidSweeperTick { value: u64 },
    #[error("source page size must be between 1 and 250, got {value}")]
    InvalidSourcePageSize { value: u32 },
    #[error("source api base '{value}' is not a valid URL")]
    InvalidSourceApiBase { value: String },
}

/// Loads configuration using layered `.env` files and `CATALOG_SYNC_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = take_string(&mut layered, "PROFILE").unwrap_or(profile_hint);
        let api_bind_addr =
            take_string(&mut layered, "API_BIND_ADDR").unwrap_or_else(default_api_bind_addr);
        let log_level = take_string(&mut layered, "LOG_LEVEL").unwrap_or_else(default_log_level);
        let log_format = take_string(&mut layered, "LOG_FORMAT")
            .map(|v| v.to_ascii_lowercase())
            .unwrap_or_else(default_log_format);
        let database_url =
            take_string(&mut layered, "DATABASE_URL").unwrap_or_else(default_database_url);
        let db_max_connections = take_parsed(&mut layered, "DB_MAX_CONNECTIONS")
            .unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms = take_parsed(&mut layered, "DB_ACQUIRE_TIMEOUT_MS")
            .unwrap_or_else(default_db_acquire_timeout_ms);

        // An unrecognised dispatch mode is an operator mistake worth surfacing, unlike a
        // malformed number which falls back to its default.
        let dispatch = match take_string(&mut layered, "SYNC_DISPATCH") {
            Some(raw) => raw
                .parse::<DispatchMode>()
                .map_err(|value| ConfigError::InvalidDispatchMode { value })?,
            None => DispatchMode::default(),
        };

        let sync = SyncConfig {
            batch_size: take_parsed(&mut layered, "SYNC_BATCH_SIZE")
                .unwrap_or_else(default_sync_batch_size),
            detail_batch_size: take_parsed(&mut layered, "SYNC_DETAIL_BATCH_SIZE")
                .unwrap_or_else(default_sync_detail_batch_size),
            detail_concurrency: take_parsed(&mut layered, "SYNC_DETAIL_CONCURRENCY")
                .unwrap_or_else(default_sync_detail_concurrency),
            stale_after_minutes: take_parsed(&mut layered, "SYNC_STALE_AFTER_MINUTES")
                .unwrap_or_else(default_sync_stale_after_minutes),
            runaway_multiplier: take_parsed(&mut layered, "SYNC_RUNAWAY_MULTIPLIER")
                .unwrap_or_else(default_sync_runaway_multiplier),
            purge_deleted_after_days: take_parsed(&mut layered, "SYNC_PURGE_DELETED_AFTER_DAYS"),
            timezone: take_string(&mut layered, "SYNC_TIMEZONE")
                .unwrap_or_else(default_sync_timezone),
            dispatch,
        };

        let queue = QueueConfig {
            tick_ms: take_parsed(&mut layered, "QUEUE_TICK_MS")
                .unwrap_or_else(default_queue_tick_ms),
            concurrency: take_parsed(&mut layered, "QUEUE_CONCURRENCY")
                .unwrap_or_else(default_queue_concurrency),
            claim_batch: take_parsed(&mut layered, "QUEUE_CLAIM_BATCH")
                .unwrap_or_else(default_queue_claim_batch),
            max_attempts: take_parsed(&mut layered, "QUEUE_MAX_ATTEMPTS")
                .unwrap_or_else(default_queue_max_attempts),
            max_run_seconds: take_parsed(&mut layered, "QUEUE_MAX_RUN_SECONDS")
                .unwrap_or_else(default_queue_max_run_seconds),
        };

        let retry_policy = RetryPolicyConfig {
            base_seconds: take_parsed(&mut layered, "RETRY_BASE_SECONDS")
                .unwrap_or_else(default_retry_base_seconds),
            max_seconds: take_parsed(&mut layered, "RETRY_MAX_SECONDS")
                .unwrap_or_else(default_retry_max_seconds),
            jitter_factor: take_parsed(&mut layered, "RETRY_JITTER_FACTOR")
                .unwrap_or_else(default_retry_jitter_factor),
        };

        let sweeper = SweeperConfig {
            tick_seconds: take_parsed(&mut layered, "SWEEPER_TICK_SECONDS")
                .unwrap_or_else(default_sweeper_tick_seconds),
            stalled_task_seconds: take_parsed(&mut layered, "SWEEPER_STALLED_TASK_SECONDS")
                .unwrap_or_else(default_sweeper_stalled_task_seconds),
        };

        let source = SourceConfig {
            api_version: take_string(&mut layered, "SOURCE_API_VERSION")
                .unwrap_or_else(default_source_api_version),
            page_size: take_parsed(&mut layered, "SOURCE_PAGE_SIZE")
                .unwrap_or_else(default_source_page_size),
            request_timeout_ms: take_parsed(&mut layered, "SOURCE_REQUEST_TIMEOUT_MS")
                .unwrap_or_else(default_source_request_timeout_ms),
            max_retries: take_parsed(&mut layered, "SOURCE_MAX_RETRIES")
                .unwrap_or_else(default_source_max_retries),
            retry_base_delay_ms: take_parsed(&mut layered, "SOURCE_RETRY_BASE_DELAY_MS")
                .unwrap_or_else(default_source_retry_base_delay_ms),
            api_base: take_string(&mut layered, "SOURCE_API_BASE"),
        };

        let config = AppConfig {
            profile,
            api_bind_addr,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            sync,
            queue,
            retry_policy,
            sweeper,
            source,
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn take_string(values: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    values
        .remove(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn take_parsed<T: FromStr>(values: &mut BTreeMap<String, String>, key: &str) -> Option<T> {
    take_string(values, key).and_then(|v| v.parse().ok())
}
