//! Request pipeline: rate-limit admission, retry, then error mapping.

use std::future::Future;

use crate::error::{ApiError, TransportFailure};
use crate::policy::{RateLimiter, RateLimiterConfig, RetryConfig, RetryPolicy};

/// Composes the rate limiter and the retry policy around a transport call.
///
/// Each `execute` takes one token, then runs the operation under the retry
/// policy. Whatever failure is left at the end is translated into an
/// [`ApiError`].
#[derive(Debug, Clone)]
pub struct RequestPipeline {
    rate_limiter: RateLimiter,
    retry: RetryPolicy,
}

impl RequestPipeline {
    pub fn new(rate_limiter: RateLimiterConfig, retry: RetryConfig) -> Self {
        Self::from_parts(RateLimiter::new(rate_limiter), RetryPolicy::new(retry))
    }

    /// Build around an existing limiter, e.g. one shared by several clients.
    pub fn from_parts(rate_limiter: RateLimiter, retry: RetryPolicy) -> Self {
        Self {
            rate_limiter,
            retry,
        }
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run one logical call.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportFailure>>,
    {
        self.rate_limiter.acquire().await?;
        self.retry.run(operation).await.map_err(|failure| {
            let err = ApiError::from(failure);
            tracing::debug!(error = %err, status = ?err.status(), "request failed");
            err
        })
    }
}

impl Default for RequestPipeline {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default(), RetryConfig::default())
    }
}
