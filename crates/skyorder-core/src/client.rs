//! Typed JSON client over a [`Transport`] and a [`RequestPipeline`].

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::pipeline::RequestPipeline;
use crate::policy::{RateLimiter, RetryPolicy};
use crate::request::{ApiRequest, ApiResponse};
use crate::transport::Transport;

/// Sends API calls through the rate limiter and retry policy and decodes the
/// JSON bodies. Endpoint-specific wrappers (archives, orders, notifications)
/// are built on top of [`ApiClient::request`].
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    pipeline: RequestPipeline,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>, pipeline: RequestPipeline) -> Self {
        Self {
            transport,
            pipeline,
        }
    }

    /// Build the pipeline from the `rate_limit` and `retry` sections of `config`.
    pub fn with_config(transport: Arc<dyn Transport>, config: &ClientConfig) -> Self {
        Self::new(
            transport,
            RequestPipeline::new(config.rate_limit.clone(), config.retry.clone()),
        )
    }

    pub fn base_url(&self) -> &str {
        self.transport.base_url()
    }

    pub fn pipeline(&self) -> &RequestPipeline {
        &self.pipeline
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        self.pipeline.rate_limiter()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        self.pipeline.retry_policy()
    }

    /// Send `request` and return the raw response.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let transport = &self.transport;
        let req = &request;
        let response = self.pipeline.execute(move || transport.send(req)).await?;
        tracing::debug!(
            method = %request.method,
            path = %request.path,
            status = response.status,
            "request completed"
        );
        Ok(response)
    }

    /// Send `request` and decode the body as `T`.
    pub async fn request<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let response = self.send(request).await?;
        Ok(response.into_json()?)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(ApiRequest::get(path)).await
    }

    pub async fn get_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let request = query
            .iter()
            .fold(ApiRequest::get(path), |req, (k, v)| req.with_query(*k, *v));
        self.request(request).await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body)?;
        self.request(ApiRequest::post(path, body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(ApiRequest::delete(path)).await
    }

    /// Destroy the rate limiter: queued calls fail with
    /// [`AdmissionError::Reset`](crate::AdmissionError::Reset) and later calls
    /// with [`AdmissionError::Closed`](crate::AdmissionError::Closed).
    pub fn shutdown(&self) {
        self.pipeline.rate_limiter().destroy();
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.transport.base_url())
            .field("rate_limiter", self.pipeline.rate_limiter())
            .finish()
    }
}
