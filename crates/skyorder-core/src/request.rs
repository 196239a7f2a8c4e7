//! Request and response types exchanged with a [`Transport`](crate::Transport).

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// HTTP method of an API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
            Self::Put => write!(f, "PUT"),
            Self::Patch => write!(f, "PATCH"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

/// One API call, relative to the transport's base URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub query: Vec<(String, String)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// A successful response. Non-2xx answers arrive as
/// [`TransportFailure`](crate::TransportFailure) instead.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// Header names are stored lower-cased.
    pub headers: HashMap<String, String>,
    /// `Value::Null` when the body was empty.
    pub body: Value,
}

impl ApiResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Deserialize the body.
    pub fn into_json<T: DeserializeOwned>(self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serialization() {
        let req = ApiRequest::post("/orders", json!({"archiveId": "abc"}));
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"method\":\"POST\""));
        assert!(json.contains("\"path\":\"/orders\""));
        assert!(!json.contains("query"));
    }

    #[test]
    fn query_pairs_keep_order() {
        let req = ApiRequest::get("/archives")
            .with_query("page", "2")
            .with_query("pageSize", "25");
        assert_eq!(
            req.query,
            vec![
                ("page".to_string(), "2".to_string()),
                ("pageSize".to_string(), "25".to_string())
            ]
        );
    }

    #[test]
    fn empty_body_decodes_as_unit() {
        let resp = ApiResponse::new(204, Value::Null);
        assert!(resp.is_success());
        resp.into_json::<()>().unwrap();
    }

    #[test]
    fn typed_body_decodes() {
        #[derive(Deserialize)]
        struct Order {
            id: String,
        }
        let resp = ApiResponse::new(200, json!({"id": "ord-1", "status": "CREATED"}));
        let order: Order = resp.into_json().unwrap();
        assert_eq!(order.id, "ord-1");
    }
}
