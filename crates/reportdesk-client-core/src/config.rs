use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::auth::{AuthInputError, normalize_base_url};
use crate::polling::DEFAULT_POLL_INTERVAL;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8787";
pub const DEFAULT_LOG_FILTER: &str = "info";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_LONG_TIMEOUT_MS: u64 = 60_000;

pub const ENV_BASE_URL: &str = "REPORTDESK_BASE_URL";
pub const ENV_TIMEOUT_MS: &str = "REPORTDESK_TIMEOUT_MS";
pub const ENV_LONG_TIMEOUT_MS: &str = "REPORTDESK_LONG_TIMEOUT_MS";
pub const ENV_POLL_INTERVAL_MS: &str = "REPORTDESK_POLL_INTERVAL_MS";
pub const ENV_STATE_DIR: &str = "REPORTDESK_STATE_DIR";
pub const ENV_LOG_FILTER: &str = "REPORTDESK_LOG_FILTER";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    /// Budget for long-running admin calls.
    pub long_request_timeout: Duration,
    pub poll_interval: Duration,
    /// `None` lets the front end pick its platform default.
    pub state_dir: Option<PathBuf>,
    pub log_filter: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid REPORTDESK_BASE_URL value '{value}': {source}")]
    InvalidBaseUrl {
        value: String,
        #[source]
        source: AuthInputError,
    },
    #[error("invalid {key} value '{value}': expected a positive integer")]
    InvalidNumber { key: &'static str, value: String },
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            long_request_timeout: Duration::from_millis(DEFAULT_LONG_TIMEOUT_MS),
            poll_interval: DEFAULT_POLL_INTERVAL,
            state_dir: None,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let base_url_raw = non_empty(ENV_BASE_URL).unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = normalize_base_url(&base_url_raw).map_err(|source| {
            ConfigError::InvalidBaseUrl {
                value: base_url_raw.clone(),
                source,
            }
        })?;

        let millis = |key: &'static str, default: u64| -> Result<Duration, ConfigError> {
            match non_empty(key) {
                None => Ok(Duration::from_millis(default)),
                Some(value) => match value.parse::<u64>() {
                    Ok(parsed) if parsed > 0 => Ok(Duration::from_millis(parsed)),
                    _ => Err(ConfigError::InvalidNumber { key, value }),
                },
            }
        };

        Ok(Self {
            base_url,
            request_timeout: millis(ENV_TIMEOUT_MS, DEFAULT_TIMEOUT_MS)?,
            long_request_timeout: millis(ENV_LONG_TIMEOUT_MS, DEFAULT_LONG_TIMEOUT_MS)?,
            poll_interval: millis(ENV_POLL_INTERVAL_MS, DEFAULT_POLL_INTERVAL.as_millis() as u64)?,
            state_dir: non_empty(ENV_STATE_DIR).map(PathBuf::from),
            log_filter: non_empty(ENV_LOG_FILTER).unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
        })
    }

    /// Applies a `--base-url` style override on top of the loaded values.
    pub fn with_base_url(mut self, raw: &str) -> Result<Self, ConfigError> {
        self.base_url = normalize_base_url(raw).map_err(|source| ConfigError::InvalidBaseUrl {
            value: raw.to_string(),
            source,
        })?;
        Ok(self)
    }
}
