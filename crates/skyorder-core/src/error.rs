//! Error types: transport failures, admission failures and the typed API taxonomy.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::policy::retry::Classify;

/// Low-level network fault reported when no HTTP response was received.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FaultCode {
    /// The peer reset the connection (`ECONNRESET`).
    ConnectionReset,
    /// The peer refused the connection (`ECONNREFUSED`).
    ConnectionRefused,
    /// Connecting or reading timed out (`ETIMEDOUT`).
    TimedOut,
    /// The host name did not resolve (`ENOTFOUND`).
    HostNotFound,
    /// No route to the network (`ENETUNREACH`).
    NetworkUnreachable,
    /// The resolver gave up temporarily (`EAI_AGAIN`).
    DnsTemporaryFailure,
    /// Any other transport code, kept verbatim.
    Other(String),
}

impl FaultCode {
    /// The conventional errno-style name of this fault.
    pub fn as_str(&self) -> &str {
        match self {
            Self::ConnectionReset => "ECONNRESET",
            Self::ConnectionRefused => "ECONNREFUSED",
            Self::TimedOut => "ETIMEDOUT",
            Self::HostNotFound => "ENOTFOUND",
            Self::NetworkUnreachable => "ENETUNREACH",
            Self::DnsTemporaryFailure => "EAI_AGAIN",
            Self::Other(code) => code,
        }
    }

    /// Returns `true` for the fixed set of faults that are worth retrying.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl From<&str> for FaultCode {
    fn from(code: &str) -> Self {
        match code {
            "ECONNRESET" => Self::ConnectionReset,
            "ECONNREFUSED" => Self::ConnectionRefused,
            "ETIMEDOUT" => Self::TimedOut,
            "ENOTFOUND" => Self::HostNotFound,
            "ENETUNREACH" => Self::NetworkUnreachable,
            "EAI_AGAIN" => Self::DnsTemporaryFailure,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The part of an HTTP response a failure carries: status, headers and
/// whatever message the server put in the body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseInfo {
    pub status: u16,
    /// Header names are stored lower-cased.
    pub headers: HashMap<String, String>,
    pub message: Option<String>,
}

impl ResponseInfo {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
    pub fn retry_after(&self) -> Option<Duration> {
        let raw = self.header("retry-after")?.trim();
        if let Ok(secs) = raw.parse::<u64>() {
            return Some(Duration::from_secs(secs));
        }
        raw.parse::<f64>()
            .ok()
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }
}

/// A failed transport operation.
///
/// Either the network layer never got a response (`code` set, `response`
/// empty), or the server answered with a non-success status (`response` set).
/// Failures with neither are local errors such as a request that could not be
/// built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportFailure {
    pub code: Option<FaultCode>,
    pub response: Option<ResponseInfo>,
    pub message: String,
}

impl TransportFailure {
    /// A network-level fault with no response.
    pub fn network(code: impl Into<FaultCode>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            response: None,
            message: message.into(),
        }
    }

    /// A non-success HTTP response.
    pub fn http(response: ResponseInfo) -> Self {
        let message = match &response.message {
            Some(msg) => format!("HTTP {}: {msg}", response.status),
            None => format!("HTTP {}", response.status),
        };
        Self {
            code: None,
            response: Some(response),
            message,
        }
    }

    /// Shorthand for an HTTP failure carrying only a status code.
    pub fn status(status: u16) -> Self {
        Self::http(ResponseInfo::new(status))
    }

    /// A failure with neither a fault code nor a response.
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            code: None,
            response: None,
            message: message.into(),
        }
    }
}

impl Classify for TransportFailure {
    fn fault_code(&self) -> Option<&FaultCode> {
        self.code.as_ref()
    }

    fn status(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status)
    }
}

/// Raised to callers waiting in the rate limiter when it is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// The limiter was reset while the caller was queued.
    #[error("rate limiter reset")]
    Reset,
    /// The limiter has been destroyed and no longer admits callers.
    #[error("rate limiter destroyed")]
    Closed,
}

/// Errors surfaced to application code by the request pipeline and client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP 401.
    #[error("authentication failed: {message}")]
    Authentication { message: String },

    /// HTTP 404.
    #[error("not found: {message}")]
    NotFound { message: String },

    /// HTTP 429. `retry_after` comes from the `Retry-After` header.
    #[error("rate limit exceeded: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    /// HTTP 408.
    #[error("request timed out: {message}")]
    Timeout { message: String },

    /// Any other failure. `status` is 0 when no response was received, in
    /// which case `code` holds the transport fault.
    #[error("API error {status}: {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// The rate limiter was reset or destroyed before admitting the call.
    #[error("request cancelled: {0}")]
    Cancelled(#[from] AdmissionError),

    /// A request body that failed to serialize, or a success response whose
    /// body did not match the expected type.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ApiError {
    /// The HTTP status this error corresponds to, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Authentication { .. } => Some(401),
            Self::NotFound { .. } => Some(404),
            Self::RateLimited { .. } => Some(429),
            Self::Timeout { .. } => Some(408),
            Self::Api { status: 0, .. } => None,
            Self::Api { status, .. } => Some(*status),
            Self::Cancelled(_) | Self::Serialization(_) => None,
        }
    }
}

impl From<TransportFailure> for ApiError {
    fn from(failure: TransportFailure) -> Self {
        let Some(response) = failure.response else {
            return Self::Api {
                status: 0,
                code: failure.code.map(|c| c.as_str().to_string()),
                message: failure.message,
            };
        };

        let retry_after = response.retry_after();
        let message = response.message.unwrap_or(failure.message);
        match response.status {
            401 => Self::Authentication { message },
            404 => Self::NotFound { message },
            429 => Self::RateLimited {
                retry_after,
                message,
            },
            408 => Self::Timeout { message },
            status => Self::Api {
                status,
                code: failure.code.map(|c| c.as_str().to_string()),
                message,
            },
        }
    }
}
