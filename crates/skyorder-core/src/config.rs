//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::policy::{RateLimiterConfig, RetryConfig};

/// Production endpoint of the imagery ordering API.
pub const DEFAULT_BASE_URL: &str = "https://api.skyorder.io/v1";

/// Header the API key is sent in unless configured otherwise.
pub const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

/// Invalid configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("base URL must not be empty")]
    EmptyBaseUrl,

    #[error("requests_per_second must be positive, got {0}")]
    InvalidRate(f64),

    #[error("bucket_size must be at least 1")]
    EmptyBucket,

    #[error("base_delay_ms must be positive")]
    ZeroBaseDelay,

    #[error("max_delay_ms ({max}) is smaller than base_delay_ms ({base})")]
    DelayOrder { base: u64, max: u64 },

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Everything needed to build a client.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub api_key_header: String,
    pub request_timeout_ms: u64,
    pub user_agent: String,
    pub rate_limit: RateLimiterConfig,
    pub retry: RetryConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            api_key_header: DEFAULT_API_KEY_HEADER.to_string(),
            request_timeout_ms: 30_000,
            user_agent: format!("skyorder/{}", env!("CARGO_PKG_VERSION")),
            rate_limit: RateLimiterConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimiterConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::EmptyBaseUrl);
        }
        let rps = self.rate_limit.requests_per_second;
        if !(rps.is_finite() && rps > 0.0) {
            return Err(ConfigError::InvalidRate(rps));
        }
        if self.rate_limit.bucket_size == 0 {
            return Err(ConfigError::EmptyBucket);
        }
        if self.retry.base_delay_ms == 0 {
            return Err(ConfigError::ZeroBaseDelay);
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::DelayOrder {
                base: self.retry.base_delay_ms,
                max: self.retry.max_delay_ms,
            });
        }
        Ok(())
    }

    /// Copy with the API key masked, for printing.
    pub fn redacted(&self) -> Self {
        Self {
            api_key: self.api_key.as_ref().map(|_| "***".to_string()),
            ..self.clone()
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("api_key_header", &self.api_key_header)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("user_agent", &self.user_agent)
            .field("rate_limit", &self.rate_limit)
            .field("retry", &self.retry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ClientConfig::default();
        config.validate().unwrap();
        assert_eq!(config.rate_limit.requests_per_second, 10.0);
        assert_eq!(config.rate_limit.bucket_size, 10);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.retry.max_delay_ms, 30_000);
        assert_eq!(
            config.retry.retryable_status_codes.iter().copied().collect::<Vec<_>>(),
            vec![408, 429, 500, 502, 503, 504]
        );
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config = ClientConfig::from_json(
            r#"{"base_url": "https://sandbox.example", "rate_limit": {"requests_per_second": 2}}"#,
        )
        .unwrap();
        assert_eq!(config.base_url, "https://sandbox.example");
        assert_eq!(config.rate_limit.requests_per_second, 2.0);
        assert_eq!(config.rate_limit.bucket_size, 10);
        assert_eq!(config.retry, RetryConfig::default());
    }

    #[test]
    fn rejects_inverted_delays() {
        let config = ClientConfig::default().with_retry(RetryConfig {
            base_delay_ms: 5_000,
            max_delay_ms: 1_000,
            ..Default::default()
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DelayOrder { base: 5_000, max: 1_000 })
        ));
    }

    #[test]
    fn rejects_non_positive_rate() {
        let config = ClientConfig::default().with_rate_limit(RateLimiterConfig {
            requests_per_second: 0.0,
            ..Default::default()
        });
        assert!(matches!(config.validate(), Err(ConfigError::InvalidRate(_))));
    }

    #[test]
    fn api_key_never_printed() {
        let config = ClientConfig::default().with_api_key("secret-key");
        assert!(!format!("{config:?}").contains("secret-key"));
        let json = serde_json::to_string(&config.redacted()).unwrap();
        assert!(!json.contains("secret-key"));
    }
}
