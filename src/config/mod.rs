//! Process configuration loaded from environment variables.
//!
//! Only the ledger database path is required. Everything else falls back to the values the
//! wallet node deployment has always used (a `tx.log` in the working directory polled every
//! 10ms).

use std::path::PathBuf;
use std::time::Duration;

pub const DB_PATH: &str = "TX_DB_PATH";
pub const LOG_PATH: &str = "TX_LOG_PATH";
pub const STATE_DIR: &str = "TX_STATE_DIR";
pub const POLL_INTERVAL_MS: &str = "TX_POLL_INTERVAL_MS";
pub const FOLLOW: &str = "TX_FOLLOW";
pub const RETRY_INITIAL_MS: &str = "TX_RETRY_INITIAL_MS";
pub const RETRY_MAX_INTERVAL_MS: &str = "TX_RETRY_MAX_INTERVAL_MS";
pub const RETRY_MAX_ELAPSED_MS: &str = "TX_RETRY_MAX_ELAPSED_MS";
pub const PROGRESS_INTERVAL: &str = "TX_PROGRESS_INTERVAL";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Set the {0} environment variable")]
    Missing(&'static str),

    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Bounded exponential backoff applied to every ledger store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    /// Total time spent retrying one call before a transient failure becomes fatal.
    pub max_elapsed: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
            max_elapsed: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> backoff::ExponentialBackoff {
        backoff::ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval)
            .with_max_elapsed_time(Some(self.max_elapsed))
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    /// Wallet node log to tail.
    pub log_path: PathBuf,
    /// Ledger database file.
    pub database_path: PathBuf,
    /// Directory holding the read offset checkpoint.
    pub state_dir: PathBuf,
    /// Sleep between polls once the log is exhausted.
    pub poll_interval: Duration,
    /// Keep tailing at end of file. When false the loop stops at the first end of file.
    pub follow: bool,
    pub retry: RetryConfig,
    /// Log progress every N lines.
    pub progress_interval: u64,
}

impl IngestConfig {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_path = get(DB_PATH)
            .map(PathBuf::from)
            .ok_or(ConfigError::Missing(DB_PATH))?;

        let defaults = RetryConfig::default();
        let retry = RetryConfig {
            initial_interval: millis(RETRY_INITIAL_MS, get(RETRY_INITIAL_MS))?
                .unwrap_or(defaults.initial_interval),
            max_interval: millis(RETRY_MAX_INTERVAL_MS, get(RETRY_MAX_INTERVAL_MS))?
                .unwrap_or(defaults.max_interval),
            max_elapsed: millis(RETRY_MAX_ELAPSED_MS, get(RETRY_MAX_ELAPSED_MS))?
                .unwrap_or(defaults.max_elapsed),
        };
        if retry.max_interval < retry.initial_interval {
            return Err(ConfigError::Invalid {
                key: RETRY_MAX_INTERVAL_MS,
                value: retry.max_interval.as_millis().to_string(),
                reason: format!("must be at least {}", RETRY_INITIAL_MS),
            });
        }

        Ok(Self {
            log_path: get(LOG_PATH)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("tx.log")),
            database_path,
            state_dir: get(STATE_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            poll_interval: millis(POLL_INTERVAL_MS, get(POLL_INTERVAL_MS))?
                .unwrap_or(Duration::from_millis(10)),
            follow: flag(FOLLOW, get(FOLLOW))?.unwrap_or(true),
            retry,
            progress_interval: positive(PROGRESS_INTERVAL, get(PROGRESS_INTERVAL))?
                .unwrap_or(1000),
        })
    }
}

fn positive(key: &'static str, value: Option<String>) -> Result<Option<u64>, ConfigError> {
    let Some(value) = value else {
        return Ok(None);
    };
    match value.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::Invalid {
            key,
            value,
            reason: "must be greater than zero".to_string(),
        }),
        Ok(n) => Ok(Some(n)),
        Err(e) => Err(ConfigError::Invalid {
            key,
            value,
            reason: e.to_string(),
        }),
    }
}

fn millis(key: &'static str, value: Option<String>) -> Result<Option<Duration>, ConfigError> {
    Ok(positive(key, value)?.map(Duration::from_millis))
}

fn flag(key: &'static str, value: Option<String>) -> Result<Option<bool>, ConfigError> {
    let Some(value) = value else {
        return Ok(None);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(Some(true)),
        "false" | "0" | "no" => Ok(Some(false)),
        _ => Err(ConfigError::Invalid {
            key,
            value,
            reason: "expected true or false".to_string(),
        }),
    }
}
