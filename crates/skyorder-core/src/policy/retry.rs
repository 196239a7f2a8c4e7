//! Exponential backoff retry policy.
//!
//! Failures are classified through [`Classify`]: a network fault with no
//! response is retried when it belongs to a fixed set of transient faults, an
//! HTTP failure is retried when its status is in the configured set, and
//! anything else propagates immediately.

use std::collections::BTreeSet;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::FaultCode;

/// Statuses treated as transient unless configured otherwise.
pub const DEFAULT_RETRYABLE_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// What the retry policy needs to know about a failure.
pub trait Classify {
    /// Transport fault code, if the failure happened below HTTP.
    fn fault_code(&self) -> Option<&FaultCode>;
    /// HTTP status, if a response was received.
    fn status(&self) -> Option<u16>;
}

/// Configuration for the retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting the first try).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay_ms: u64,
    /// Cap on any single delay.
    pub max_delay_ms: u64,
    /// HTTP statuses that are worth retrying.
    pub retryable_status_codes: BTreeSet<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            retryable_status_codes: DEFAULT_RETRYABLE_STATUS_CODES.into_iter().collect(),
        }
    }
}

impl RetryConfig {
    /// Delay to wait after the `attempt`-th failure (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(calculate_backoff(
            attempt,
            self.base_delay_ms,
            self.max_delay_ms,
        ))
    }
}

/// Returns `true` if `error` is a transient failure worth retrying.
///
/// `None` is never retryable. A fault code only counts when no response was
/// received; once a status is present only the status decides.
pub fn is_retryable_error<E: Classify + ?Sized>(
    error: Option<&E>,
    retryable_status_codes: &BTreeSet<u16>,
) -> bool {
    let Some(error) = error else {
        return false;
    };
    match (error.status(), error.fault_code()) {
        (Some(status), _) => retryable_status_codes.contains(&status),
        (None, Some(code)) => code.is_transient(),
        (None, None) => false,
    }
}

/// `min(base_delay_ms * 2^attempt, max_delay_ms)`, saturating on overflow.
pub fn calculate_backoff(attempt: u32, base_delay_ms: u64, max_delay_ms: u64) -> u64 {
    let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
    base_delay_ms.saturating_mul(factor).min(max_delay_ms)
}

/// Retry driver. Holds only its configuration, so one policy can be cloned
/// and shared across any number of call sites.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Classify `error` against this policy's status set.
    pub fn is_retryable<E: Classify + ?Sized>(&self, error: &E) -> bool {
        is_retryable_error(Some(error), &self.config.retryable_status_codes)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or has been invoked `max_retries + 1` times.
    ///
    /// The error returned on exhaustion is the last one the operation
    /// produced, unchanged.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        let mut attempt = 0u32;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::debug!(attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !self.is_retryable(&e) => {
                    tracing::debug!(attempt, error = %e, "non-retryable failure");
                    return Err(e);
                }
                Err(e) if attempt >= self.config.max_retries => {
                    tracing::error!(
                        attempts = attempt + 1,
                        error = %e,
                        "max retries exceeded"
                    );
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.config.backoff(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying operation"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// A reusable policy bound to `config`; call [`RetryPolicy::run`] on it for
/// every operation that should share the configuration.
pub fn create_retry_wrapper(config: RetryConfig) -> RetryPolicy {
    RetryPolicy::new(config)
}

/// One-shot form of [`RetryPolicy::run`].
pub async fn run_with_retry<T, E, F, Fut>(operation: F, config: &RetryConfig) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + Display,
{
    RetryPolicy::new(config.clone()).run(operation).await
}
