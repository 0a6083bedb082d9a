//! Environment-driven application configuration.
//!
//! Required:
//! - `INKLY_BASE_URL`: generation server base URL.
//!
//! Optional:
//! - `INKLY_API_KEY` (default `dev-key`)
//! - `INKLY_POLL_INTERVAL_SECS` (default 30)
//! - `INKLY_POLL_BUDGET_SECS` (default 1800)
//! - `INKLY_COMPUTE_TIMEOUT_SECS` (default 1800)
//! - `INKLY_READ_TIMEOUT_SECS` (default 600)
//! - `INKLY_MISSING_REPRESENTATIVE_LIMIT` (default unbounded)

use std::time::Duration;

use inkly_poller::{DEFAULT_POLL_BUDGET, DEFAULT_POLL_INTERVAL, PollerConfig};
use inkly_transport::{DEFAULT_COMPUTE_TIMEOUT, DEFAULT_READ_TIMEOUT, TransportConfig};
use thiserror::Error;

use crate::is_https_endpoint;

/// Base URL variable.
pub const BASE_URL_VAR: &str = "INKLY_BASE_URL";
/// API key variable.
pub const API_KEY_VAR: &str = "INKLY_API_KEY";
/// Poll interval variable, whole seconds.
pub const POLL_INTERVAL_VAR: &str = "INKLY_POLL_INTERVAL_SECS";
/// Poll budget variable, whole seconds.
pub const POLL_BUDGET_VAR: &str = "INKLY_POLL_BUDGET_SECS";
/// Compute endpoint timeout variable, whole seconds.
pub const COMPUTE_TIMEOUT_VAR: &str = "INKLY_COMPUTE_TIMEOUT_SECS";
/// Read endpoint timeout variable, whole seconds.
pub const READ_TIMEOUT_VAR: &str = "INKLY_READ_TIMEOUT_SECS";
/// Missing representative tolerance variable.
pub const MISSING_REPRESENTATIVE_LIMIT_VAR: &str = "INKLY_MISSING_REPRESENTATIVE_LIMIT";

/// Development key used when no key is configured.
pub const DEFAULT_API_KEY: &str = "dev-key";

/// Application configuration loaded from environment variables.
#[derive(Clone, PartialEq)]
pub struct AppConfig {
    /// Generation server base URL.
    pub base_url: String,
    /// Static API key sent as `X-API-Key`.
    pub api_key: String,
    /// Pause between status polls.
    pub poll_interval: Duration,
    /// Total polling budget.
    pub poll_budget: Duration,
    /// Timeout for upload, generate, analyze and reanalyze.
    pub compute_timeout: Duration,
    /// Timeout for status and downloads.
    pub read_timeout: Duration,
    /// Consecutive "done without representative" answers tolerated.
    pub missing_representative_limit: Option<u32>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("poll_interval", &self.poll_interval)
            .field("poll_budget", &self.poll_budget)
            .field("compute_timeout", &self.compute_timeout)
            .field("read_timeout", &self.read_timeout)
            .field(
                "missing_representative_limit",
                &self.missing_representative_limit,
            )
            .finish()
    }
}

impl AppConfig {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when a required variable is missing or a value
    /// does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    ///
    /// Blank values count as unset.
    ///
    /// # Errors
    /// Same as [`AppConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let base_url = read(BASE_URL_VAR).ok_or(ConfigError::Missing(BASE_URL_VAR))?;
        let api_key = read(API_KEY_VAR).unwrap_or_else(|| DEFAULT_API_KEY.to_string());

        let config = Self {
            base_url,
            api_key,
            poll_interval: seconds(
                POLL_INTERVAL_VAR,
                read(POLL_INTERVAL_VAR),
                DEFAULT_POLL_INTERVAL,
            )?,
            poll_budget: seconds(POLL_BUDGET_VAR, read(POLL_BUDGET_VAR), DEFAULT_POLL_BUDGET)?,
            compute_timeout: seconds(
                COMPUTE_TIMEOUT_VAR,
                read(COMPUTE_TIMEOUT_VAR),
                DEFAULT_COMPUTE_TIMEOUT,
            )?,
            read_timeout: seconds(
                READ_TIMEOUT_VAR,
                read(READ_TIMEOUT_VAR),
                DEFAULT_READ_TIMEOUT,
            )?,
            missing_representative_limit: read(MISSING_REPRESENTATIVE_LIMIT_VAR)
                .map(|raw| positive(MISSING_REPRESENTATIVE_LIMIT_VAR, &raw))
                .transpose()?,
        };

        // Validate the URL now so the failure names the variable.
        config.transport_config()?;
        if !is_https_endpoint(&config.base_url) {
            tracing::warn!(
                base_url = %config.base_url,
                "base URL is not HTTPS; the API key travels in clear text"
            );
        }
        Ok(config)
    }

    /// Builds the transport settings.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidBaseUrl`] when the base URL does not parse.
    pub fn transport_config(&self) -> Result<TransportConfig, ConfigError> {
        let mut transport = TransportConfig::new(&self.base_url, self.api_key.clone())
            .map_err(|error| ConfigError::InvalidBaseUrl(error.to_string()))?;
        transport.compute_timeout = self.compute_timeout;
        transport.read_timeout = self.read_timeout;
        Ok(transport)
    }

    /// Builds the poller settings.
    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            interval: self.poll_interval,
            budget: self.poll_budget,
            missing_representative_limit: self.missing_representative_limit,
            ..PollerConfig::default()
        }
    }
}

fn seconds(
    name: &'static str,
    raw: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match raw {
        None => Ok(default),
        Some(raw) => positive(name, &raw).map(|secs| Duration::from_secs(u64::from(secs))),
    }
}

fn positive(name: &'static str, raw: &str) -> Result<u32, ConfigError> {
    match raw.parse::<u32>() {
        Ok(0) => Err(ConfigError::Invalid {
            name,
            value: raw.to_string(),
            reason: "must be greater than zero".to_string(),
        }),
        Ok(value) => Ok(value),
        Err(error) => Err(ConfigError::Invalid {
            name,
            value: raw.to_string(),
            reason: error.to_string(),
        }),
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Required variable is unset or blank.
    #[error("{0} must be set")]
    Missing(&'static str),
    /// Variable value does not parse.
    #[error("{name}={value:?} is invalid: {reason}")]
    Invalid {
        /// Variable name.
        name: &'static str,
        /// Raw value.
        value: String,
        /// Parse failure.
        reason: String,
    },
    /// Base URL is not usable.
    #[error("INKLY_BASE_URL is invalid: {0}")]
    InvalidBaseUrl(String),
}

#[cfg(test)]
mod tests {
    //! Unit tests for configuration parsing.

    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_only_base_url_is_set() {
        let config = AppConfig::from_lookup(lookup(&[(BASE_URL_VAR, "https://inkly.test")]))
            .expect("config should load");
        assert_eq!(config.api_key, DEFAULT_API_KEY);
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.poll_budget, Duration::from_secs(1800));
        assert_eq!(config.compute_timeout, DEFAULT_COMPUTE_TIMEOUT);
        assert_eq!(config.read_timeout, DEFAULT_READ_TIMEOUT);
        assert_eq!(config.missing_representative_limit, None);
        assert_eq!(config.poller_config().max_polls(), 60);
    }

    #[test]
    fn missing_base_url_is_reported_by_name() {
        let error = AppConfig::from_lookup(lookup(&[(BASE_URL_VAR, "   ")]))
            .expect_err("blank base url should fail");
        assert_eq!(error, ConfigError::Missing(BASE_URL_VAR));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = AppConfig::from_lookup(lookup(&[
            (BASE_URL_VAR, "http://localhost:8000"),
            (API_KEY_VAR, "secret"),
            (POLL_INTERVAL_VAR, "5"),
            (POLL_BUDGET_VAR, "60"),
            (READ_TIMEOUT_VAR, "15"),
            (MISSING_REPRESENTATIVE_LIMIT_VAR, "3"),
        ]))
        .expect("config should load");
        assert_eq!(config.api_key, "secret");
        assert_eq!(config.poller_config().max_polls(), 12);
        assert_eq!(config.missing_representative_limit, Some(3));

        let transport = config.transport_config().expect("transport should build");
        assert_eq!(transport.read_timeout, Duration::from_secs(15));
        assert_eq!(transport.compute_timeout, DEFAULT_COMPUTE_TIMEOUT);
    }

    #[test]
    fn zero_and_garbage_values_are_rejected() {
        let zero = AppConfig::from_lookup(lookup(&[
            (BASE_URL_VAR, "https://inkly.test"),
            (POLL_INTERVAL_VAR, "0"),
        ]))
        .expect_err("zero interval should fail");
        assert!(matches!(zero, ConfigError::Invalid { name: POLL_INTERVAL_VAR, .. }));

        let garbage = AppConfig::from_lookup(lookup(&[
            (BASE_URL_VAR, "https://inkly.test"),
            (MISSING_REPRESENTATIVE_LIMIT_VAR, "lots"),
        ]))
        .expect_err("non-numeric limit should fail");
        assert!(matches!(
            garbage,
            ConfigError::Invalid {
                name: MISSING_REPRESENTATIVE_LIMIT_VAR,
                ..
            }
        ));
    }

    #[test]
    fn unparseable_base_url_is_rejected() {
        let error = AppConfig::from_lookup(lookup(&[(BASE_URL_VAR, "not a url")]))
            .expect_err("bad url should fail");
        assert!(matches!(error, ConfigError::InvalidBaseUrl(_)));
    }

    #[test]
    fn debug_output_hides_api_key() {
        let config = AppConfig::from_lookup(lookup(&[
            (BASE_URL_VAR, "https://inkly.test"),
            (API_KEY_VAR, "super-secret"),
        ]))
        .expect("config should load");
        assert!(!format!("{config:?}").contains("super-secret"));
    }
}
