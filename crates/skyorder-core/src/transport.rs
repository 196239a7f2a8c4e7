//! The `Transport` trait: the seam between the request pipeline and any
//! HTTP client.

use async_trait::async_trait;

use crate::error::TransportFailure;
use crate::request::{ApiRequest, ApiResponse};

/// Performs exactly one HTTP exchange per call. Retrying, pacing and error
/// mapping happen above this layer.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` for use across Tokio tasks.
///
/// # Object Safety
/// The trait is object-safe and can be stored as `Arc<dyn Transport>`.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send `req`. Non-2xx responses must be returned as a
    /// [`TransportFailure`] carrying the response status.
    async fn send(&self, req: &ApiRequest) -> Result<ApiResponse, TransportFailure>;

    /// Base URL requests are resolved against.
    fn base_url(&self) -> &str;
}
