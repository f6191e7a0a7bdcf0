//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Realtime endpoint used when `SOCKET_URL` is not set.
pub const DEFAULT_SOCKET_URL: &str = "http://localhost:5000";
/// Fixed interval between session liveness checks.
pub const DEFAULT_LIVENESS_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
    #[error("Invalid URL in {key}: {source}")]
    InvalidUrl {
        key: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("Invalid number in {key}: {value}")]
    InvalidNumber { key: &'static str, value: String },
}

/// Endpoints and timings for the session client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// REST base URL.
    pub api_url: Url,
    /// Realtime base URL.
    #[serde(default = "default_socket_url")]
    pub socket_url: Url,
    #[serde(default = "default_liveness_interval_ms")]
    pub liveness_interval_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_socket_url() -> Url {
    Url::parse(DEFAULT_SOCKET_URL).expect("default socket URL is valid")
}

const fn default_liveness_interval_ms() -> u64 {
    DEFAULT_LIVENESS_INTERVAL_MS
}

const fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl ClientConfig {
    /// Create a config for `api_url` with every other setting at its default.
    #[must_use]
    pub fn new(api_url: Url) -> Self {
        Self {
            api_url,
            socket_url: default_socket_url(),
            liveness_interval_ms: DEFAULT_LIVENESS_INTERVAL_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            log_level: default_log_level(),
        }
    }

    /// Load from process environment variables.
    ///
    /// # Errors
    /// Returns error if `API_URL` is missing or any value fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup.
    ///
    /// # Errors
    /// Returns error if `API_URL` is missing or any value fails to parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_url = get("API_URL").ok_or(ConfigError::Missing("API_URL"))?;
        let mut config = Self::new(parse_url("API_URL", &api_url)?);

        if let Some(socket_url) = get("SOCKET_URL") {
            config.socket_url = parse_url("SOCKET_URL", &socket_url)?;
        }
        if let Some(ms) = get("NEURALFLOW_LIVENESS_INTERVAL_MS") {
            config.liveness_interval_ms = parse_ms("NEURALFLOW_LIVENESS_INTERVAL_MS", &ms)?;
        }
        if let Some(ms) = get("NEURALFLOW_REQUEST_TIMEOUT_MS") {
            config.request_timeout_ms = parse_ms("NEURALFLOW_REQUEST_TIMEOUT_MS", &ms)?;
        }
        if let Some(level) = get("NEURALFLOW_LOG_LEVEL") {
            config.log_level = level;
        }

        Ok(config)
    }

    #[must_use]
    pub const fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Absolute URL of a REST endpoint, e.g. `endpoint("auth/logout")`.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

fn parse_url(key: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value.trim()).map_err(|source| ConfigError::InvalidUrl { key, source })
}

fn parse_ms(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidNumber {
            key,
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tokio_test::{assert_err, assert_ok};

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_api_url_required() {
        let err = assert_err!(ClientConfig::from_lookup(lookup(&[])));
        assert!(matches!(err, ConfigError::Missing("API_URL")));
    }

    #[test]
    fn test_defaults() {
        let config = assert_ok!(ClientConfig::from_lookup(lookup(&[(
            "API_URL",
            "https://api.neuralflow.test/v1"
        )])));
        assert_eq!(config.socket_url.as_str(), "http://localhost:5000/");
        assert_eq!(config.liveness_interval(), Duration::from_secs(30));
        assert_eq!(config.log_level, "info");
        assert_eq!(
            config.endpoint("auth/logout"),
            "https://api.neuralflow.test/v1/auth/logout"
        );
    }

    #[test]
    fn test_overrides() {
        let config = assert_ok!(ClientConfig::from_lookup(lookup(&[
            ("API_URL", "https://api.neuralflow.test/"),
            ("SOCKET_URL", "https://rt.neuralflow.test"),
            ("NEURALFLOW_LIVENESS_INTERVAL_MS", "5000"),
            ("NEURALFLOW_LOG_LEVEL", "debug"),
        ])));
        assert_eq!(config.socket_url.host_str(), Some("rt.neuralflow.test"));
        assert_eq!(config.liveness_interval_ms, 5000);
        assert_eq!(config.endpoint("/auth"), "https://api.neuralflow.test/auth");
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_invalid_values() {
        let err = assert_err!(ClientConfig::from_lookup(lookup(&[("API_URL", "not a url")])));
        assert!(matches!(err, ConfigError::InvalidUrl { key: "API_URL", .. }));

        let err = assert_err!(ClientConfig::from_lookup(lookup(&[
            ("API_URL", "https://api.neuralflow.test"),
            ("NEURALFLOW_REQUEST_TIMEOUT_MS", "soon"),
        ])));
        assert!(matches!(err, ConfigError::InvalidNumber { .. }));
    }
}
