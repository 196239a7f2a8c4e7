//! skyorder-core: request dispatch core for the SkyOrder imagery API client.
//!
//! # Overview
//!
//! Every call the client makes flows through the same pipeline:
//!
//! - [`RateLimiter`]: token-bucket admission gate with a FIFO wait queue
//! - [`RetryPolicy`]: exponential backoff for transient failures
//! - [`RequestPipeline`]: acquire once, retry, map to [`ApiError`]
//! - [`Transport`]: the async trait an HTTP backend implements
//! - [`ApiClient`]: typed JSON calls on top of the pipeline
//! - [`ClientConfig`]: serde-friendly configuration with defaults

pub mod client;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod policy;
pub mod request;
pub mod transport;

pub use client::ApiClient;
pub use config::{ClientConfig, ConfigError};
pub use error::{AdmissionError, ApiError, FaultCode, ResponseInfo, TransportFailure};
pub use pipeline::RequestPipeline;
pub use policy::{RateLimiter, RateLimiterConfig, RetryConfig, RetryPolicy};
pub use request::{ApiRequest, ApiResponse, Method};
pub use transport::Transport;
