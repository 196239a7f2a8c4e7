//! Policy engine: the two reliability layers every request passes through.
//!
//! ```text
//! Request → [RateLimiter] → [RetryPolicy] → [Transport]
//! ```
//!
//! The limiter admits a logical call once; retries issued by the policy reuse
//! that admission and never re-enter the queue.

pub mod rate_limiter;
pub mod retry;

pub use rate_limiter::{RateLimiter, RateLimiterConfig, TokenBucket};
pub use retry::{
    calculate_backoff, create_retry_wrapper, is_retryable_error, run_with_retry, Classify,
    RetryConfig, RetryPolicy, DEFAULT_RETRYABLE_STATUS_CODES,
};
