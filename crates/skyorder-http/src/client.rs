//! HTTP transport backed by `reqwest`.
//!
//! One `send` is one HTTP exchange. Failures are reported as
//! [`TransportFailure`]s: network faults carry a [`FaultCode`] recovered from
//! the error's source chain, non-2xx answers carry status, headers and the
//! server's message. Pacing and retries are left to the core pipeline.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use thiserror::Error;

use skyorder_core::{
    ApiClient, ApiRequest, ApiResponse, ClientConfig, ConfigError, FaultCode, Method,
    ResponseInfo, Transport, TransportFailure,
};

/// Errors building an [`HttpTransport`].
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// `reqwest`-based [`Transport`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: String,
    http: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport with the timeout, user agent and API key of `config`.
    pub fn new(config: &ClientConfig) -> Result<Self, BuildError> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        if let Some(key) = &config.api_key {
            let name = HeaderName::from_bytes(config.api_key_header.as_bytes()).map_err(|e| {
                BuildError::InvalidHeader {
                    name: config.api_key_header.clone(),
                    reason: e.to_string(),
                }
            })?;
            let mut value = HeaderValue::from_str(key).map_err(|e| BuildError::InvalidHeader {
                name: config.api_key_header.clone(),
                reason: e.to_string(),
            })?;
            value.set_sensitive(true);
            headers.insert(name, value);
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, req: &ApiRequest) -> Result<ApiResponse, TransportFailure> {
        let url = self.url_for(&req.path);
        let mut builder = self.http.request(to_reqwest_method(req.method), &url);
        if !req.query.is_empty() {
            builder = builder.query(&req.query);
        }
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }

        let resp = builder.send().await.map_err(|e| network_failure(&e))?;
        let status = resp.status().as_u16();
        let headers = collect_headers(resp.headers());
        let read = resp.bytes().await;

        if !(200..300).contains(&status) {
            tracing::debug!(status, url = %url, "non-success response");
            let mut info = ResponseInfo::new(status);
            info.headers = headers;
            match &read {
                Ok(bytes) => info.message = server_message(bytes),
                Err(e) => tracing::debug!(status, error = %e, "failed to read error body"),
            }
            return Err(TransportFailure::http(info));
        }
        let bytes = read.map_err(|e| network_failure(&e))?;

        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .map_err(|e| TransportFailure::other(format!("invalid JSON body from {url}: {e}")))?
        };
        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Build a ready-to-use client over HTTP.
pub fn connect(config: &ClientConfig) -> Result<ApiClient, BuildError> {
    let transport = HttpTransport::new(config)?;
    Ok(ApiClient::with_config(Arc::new(transport), config))
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

fn collect_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

/// Pull a human-readable message out of an error body: the `message`,
/// `detail` or `error` string of a JSON object, else the trimmed text.
fn server_message(bytes: &[u8]) -> Option<String> {
    if let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(bytes) {
        for key in ["message", "detail", "error"] {
            if let Some(Value::String(msg)) = map.get(key) {
                return Some(msg.clone());
            }
        }
    }
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn network_failure(err: &reqwest::Error) -> TransportFailure {
    let code = if err.is_timeout() {
        FaultCode::TimedOut
    } else if let Some(code) = fault_from_chain(err) {
        code
    } else if err.is_connect() {
        FaultCode::ConnectionRefused
    } else {
        FaultCode::Other("EREQUEST".to_string())
    };
    tracing::debug!(code = %code, error = %err, "transport fault");
    TransportFailure::network(code, err.to_string())
}

/// Walk the source chain looking for an I/O error kind or a resolver message
/// that names one of the known faults.
fn fault_from_chain(err: &(dyn StdError + 'static)) -> Option<FaultCode> {
    let mut cause: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = cause {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            match io_err.kind() {
                io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                    return Some(FaultCode::ConnectionReset)
                }
                io::ErrorKind::ConnectionRefused => return Some(FaultCode::ConnectionRefused),
                io::ErrorKind::TimedOut => return Some(FaultCode::TimedOut),
                _ => {}
            }
        }
        let text = e.to_string().to_ascii_lowercase();
        if text.contains("temporary failure in name resolution") {
            return Some(FaultCode::DnsTemporaryFailure);
        }
        if text.contains("failed to lookup address")
            || text.contains("name or service not known")
            || text.contains("nodename nor servname")
            || text.contains("no such host")
        {
            return Some(FaultCode::HostNotFound);
        }
        if text.contains("network is unreachable") {
            return Some(FaultCode::NetworkUnreachable);
        }
        if text.contains("connection reset") || text.contains("connection closed before message completed") {
            return Some(FaultCode::ConnectionReset);
        }
        cause = e.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("client error (Connect)")]
    struct Wrapper(#[source] io::Error);

    #[test]
    fn io_kinds_map_to_faults() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_eq!(fault_from_chain(&refused), Some(FaultCode::ConnectionRefused));

        let reset = Wrapper(io::Error::from(io::ErrorKind::ConnectionReset));
        assert_eq!(fault_from_chain(&reset), Some(FaultCode::ConnectionReset));
    }

    #[test]
    fn resolver_messages_map_to_faults() {
        let again = io::Error::new(
            io::ErrorKind::Other,
            "failed to lookup address information: Temporary failure in name resolution",
        );
        assert_eq!(fault_from_chain(&again), Some(FaultCode::DnsTemporaryFailure));

        let missing = io::Error::new(
            io::ErrorKind::Other,
            "failed to lookup address information: Name or service not known",
        );
        assert_eq!(fault_from_chain(&missing), Some(FaultCode::HostNotFound));

        let unreachable = io::Error::new(io::ErrorKind::Other, "Network is unreachable (os error 101)");
        assert_eq!(fault_from_chain(&unreachable), Some(FaultCode::NetworkUnreachable));
    }

    #[test]
    fn unknown_errors_are_unclassified() {
        let other = io::Error::new(io::ErrorKind::Other, "something odd");
        assert_eq!(fault_from_chain(&other), None);
    }

    #[test]
    fn server_message_prefers_json_fields() {
        assert_eq!(
            server_message(br#"{"detail": "AOI too large"}"#).as_deref(),
            Some("AOI too large")
        );
        assert_eq!(
            server_message(br#"{"message": "bad key", "detail": "x"}"#).as_deref(),
            Some("bad key")
        );
        assert_eq!(server_message(b"  upstream down \n").as_deref(), Some("upstream down"));
        assert_eq!(server_message(b""), None);
    }

    #[test]
    fn url_joining_normalises_slashes() {
        let transport = HttpTransport::new(&ClientConfig::new("https://api.example/v1/")).unwrap();
        assert_eq!(transport.url_for("/orders"), "https://api.example/v1/orders");
        assert_eq!(transport.url_for("orders"), "https://api.example/v1/orders");
    }

    #[test]
    fn rejects_invalid_key_header() {
        let mut config = ClientConfig::default().with_api_key("k");
        config.api_key_header = "bad header".into();
        assert!(matches!(
            HttpTransport::new(&config),
            Err(BuildError::InvalidHeader { .. })
        ));
    }
}
