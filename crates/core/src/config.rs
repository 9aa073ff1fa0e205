//! Runtime configuration for the synchronization engine.
//!
//! Loaded once at startup and shared as `Arc<SyncConfig>`; every component
//! receives it through its constructor.

use std::time::Duration;

use crate::catalog::EntityType;

/// Value shipped in sample `.env` files. Treated the same as no key.
pub const API_KEY_PLACEHOLDER: &str = "API_KEY_PLACEHOLDER";

/// Default upstream base URL.
pub const DEFAULT_API_BASE_URL: &str = "https://apis.metasync.com/Almacen";

/// Errors raised while reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} must be a valid {expected}, got '{value}'")]
    Invalid {
        key: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Engine configuration loaded from environment variables.
///
/// All fields have defaults matching the production tuning of the
/// upstream integration; override via environment variables.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Upstream base URL (`INVENTORY_API_URL`).
    pub api_base_url: String,
    /// Upstream API key (`INVENTORY_API_KEY`). See [`SyncConfig::api_key`].
    pub api_key: Option<String>,
    /// Owning company id, sent as `idempresa` (`INVENTORY_COMPANY_ID`).
    pub company_id: i64,
    /// Sales channel, sent as `canal` (`INVENTORY_CHANNEL`).
    pub channel: String,
    /// Records requested per page (`SYNC_PAGE_SIZE`).
    pub page_size: u32,
    /// Pause between batches (`SYNC_BATCH_DELAY_MS`).
    pub batch_delay: Duration,
    /// HTTP request timeout (`SYNC_REQUEST_TIMEOUT_SECS`).
    pub request_timeout: Duration,
    /// Retry cap for transient upstream failures (`SYNC_MAX_RETRIES`).
    pub max_retries: u32,
    /// First backoff delay; doubles on every attempt (`SYNC_RETRY_BASE_SECS`).
    pub retry_base_delay: Duration,
    /// Pause after a batch failed upstream (`SYNC_UPSTREAM_ERROR_DELAY_MS`).
    pub upstream_error_delay: Duration,
    /// Batch-level error ceiling (`SYNC_MAX_BATCH_ERRORS`).
    pub max_batch_errors: u32,
    /// Record-level error ceiling (`SYNC_MAX_RECORD_ERRORS`).
    pub max_record_errors: u64,
    /// Length of the bounded error message list (`SYNC_MAX_ERROR_MESSAGES`).
    pub max_error_messages: usize,
    /// Vehicle row count above which incremental runs skip existing rows.
    pub skip_existing_vehicles_threshold: i64,
    /// Part row count above which incremental runs skip existing rows.
    pub skip_existing_parts_threshold: i64,
    /// Reconciliation safety guard, in percent (`SYNC_RECONCILE_THRESHOLD_PCT`).
    pub reconcile_threshold_percent: f64,
    /// Pending parts examined per resolver page (`SYNC_PENDING_PAGE_SIZE`).
    pub pending_page_size: i64,
    /// Scheduler tick (`SYNC_SCHEDULER_POLL_SECS`).
    pub scheduler_poll_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_key: None,
            company_id: 1,
            channel: "MURCIA".to_string(),
            page_size: 1000,
            batch_delay: Duration::from_millis(300),
            request_timeout: Duration::from_secs(20),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(2),
            upstream_error_delay: Duration::from_millis(5000),
            max_batch_errors: 10,
            max_record_errors: 10_000,
            max_error_messages: 100,
            skip_existing_vehicles_threshold: 1000,
            skip_existing_parts_threshold: 10_000,
            reconcile_threshold_percent: 10.0,
            pending_page_size: 1000,
            scheduler_poll_interval: Duration::from_secs(60),
        }
    }
}

impl SyncConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                          | Default                              |
    /// |----------------------------------|--------------------------------------|
    /// | `INVENTORY_API_URL`              | `https://apis.metasync.com/Almacen`  |
    /// | `INVENTORY_API_KEY`              | unset                                |
    /// | `INVENTORY_COMPANY_ID`           | `1`                                  |
    /// | `INVENTORY_CHANNEL`              | `MURCIA`                             |
    /// | `SYNC_PAGE_SIZE`                 | `1000`                               |
    /// | `SYNC_BATCH_DELAY_MS`            | `300`                                |
    /// | `SYNC_REQUEST_TIMEOUT_SECS`      | `20`                                 |
    /// | `SYNC_MAX_RETRIES`               | `3`                                  |
    /// | `SYNC_RETRY_BASE_SECS`           | `2`                                  |
    /// | `SYNC_UPSTREAM_ERROR_DELAY_MS`   | `5000`                               |
    /// | `SYNC_MAX_BATCH_ERRORS`          | `10`                                 |
    /// | `SYNC_MAX_RECORD_ERRORS`         | `10000`                              |
    /// | `SYNC_MAX_ERROR_MESSAGES`        | `100`                                |
    /// | `SYNC_SKIP_EXISTING_VEHICLES`    | `1000`                               |
    /// | `SYNC_SKIP_EXISTING_PARTS`       | `10000`                              |
    /// | `SYNC_RECONCILE_THRESHOLD_PCT`   | `10`                                 |
    /// | `SYNC_PENDING_PAGE_SIZE`         | `1000`                               |
    /// | `SYNC_SCHEDULER_POLL_SECS`       | `60`                                 |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            api_base_url: get("INVENTORY_API_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base_url),
            api_key: get("INVENTORY_API_KEY").map(|v| v.trim().to_string()),
            company_id: parse(&get, "INVENTORY_COMPANY_ID", "integer", defaults.company_id)?,
            channel: get("INVENTORY_CHANNEL").unwrap_or(defaults.channel),
            page_size: parse(&get, "SYNC_PAGE_SIZE", "u32", defaults.page_size)?.max(1),
            batch_delay: Duration::from_millis(parse(
                &get,
                "SYNC_BATCH_DELAY_MS",
                "u64",
                defaults.batch_delay.as_millis() as u64,
            )?),
            request_timeout: Duration::from_secs(parse(
                &get,
                "SYNC_REQUEST_TIMEOUT_SECS",
                "u64",
                defaults.request_timeout.as_secs(),
            )?),
            max_retries: parse(&get, "SYNC_MAX_RETRIES", "u32", defaults.max_retries)?,
            retry_base_delay: Duration::from_secs(parse(
                &get,
                "SYNC_RETRY_BASE_SECS",
                "u64",
                defaults.retry_base_delay.as_secs(),
            )?),
            upstream_error_delay: Duration::from_millis(parse(
                &get,
                "SYNC_UPSTREAM_ERROR_DELAY_MS",
                "u64",
                defaults.upstream_error_delay.as_millis() as u64,
            )?),
            max_batch_errors: parse(
                &get,
                "SYNC_MAX_BATCH_ERRORS",
                "u32",
                defaults.max_batch_errors,
            )?,
            max_record_errors: parse(
                &get,
                "SYNC_MAX_RECORD_ERRORS",
                "u64",
                defaults.max_record_errors,
            )?,
            max_error_messages: parse(
                &get,
                "SYNC_MAX_ERROR_MESSAGES",
                "usize",
                defaults.max_error_messages,
            )?,
            skip_existing_vehicles_threshold: parse(
                &get,
                "SYNC_SKIP_EXISTING_VEHICLES",
                "integer",
                defaults.skip_existing_vehicles_threshold,
            )?,
            skip_existing_parts_threshold: parse(
                &get,
                "SYNC_SKIP_EXISTING_PARTS",
                "integer",
                defaults.skip_existing_parts_threshold,
            )?,
            reconcile_threshold_percent: parse_percent(
                &get,
                "SYNC_RECONCILE_THRESHOLD_PCT",
                defaults.reconcile_threshold_percent,
            )?,
            pending_page_size: parse(
                &get,
                "SYNC_PENDING_PAGE_SIZE",
                "integer",
                defaults.pending_page_size,
            )?
            .max(1),
            scheduler_poll_interval: Duration::from_secs(parse(
                &get,
                "SYNC_SCHEDULER_POLL_SECS",
                "u64",
                defaults.scheduler_poll_interval.as_secs(),
            )?),
        })
    }

    /// The configured API key, or `None` when it is missing or still the
    /// sample placeholder.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty() && *k != API_KEY_PLACEHOLDER)
    }

    /// Local row count above which incremental runs of `entity` use the
    /// skip-existing write path.
    pub fn skip_existing_threshold(&self, entity: EntityType) -> i64 {
        match entity {
            EntityType::Vehicles => self.skip_existing_vehicles_threshold,
            EntityType::Parts | EntityType::Catalog => self.skip_existing_parts_threshold,
        }
    }
}

fn parse<G, T>(get: &G, key: &'static str, expected: &'static str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key,
            expected,
            value: raw,
        }),
    }
}

/// A finite percentage in `0..=100`.
fn parse_percent<G>(get: &G, key: &'static str, default: f64) -> Result<f64, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    const EXPECTED: &str = "percentage between 0 and 100";
    let value: f64 = parse(get, key, EXPECTED, default)?;
    if value.is_finite() && (0.0..=100.0).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            key,
            expected: EXPECTED,
            value: value.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
