//! HttpClient trait: the seam for outbound HTTP.
//!
//! Both the `http_request` tool and the workflow `http` action go through
//! this trait so tests can swap in a canned client.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::HttpError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequest {
    /// Upper-case method (GET, POST, PUT, PATCH, DELETE)
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl HttpRequest {
    /// Parse a request out of a loosely-typed JSON argument object.
    ///
    /// `body` may be a string or any JSON value (serialized as-is).
    pub fn from_json(args: &serde_json::Value) -> Result<Self, HttpError> {
        let url = args["url"]
            .as_str()
            .ok_or_else(|| HttpError::InvalidRequest("Missing 'url'".into()))?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(HttpError::InvalidRequest(
                "URL must start with http:// or https://".into(),
            ));
        }

        let method = args["method"].as_str().unwrap_or("GET").to_uppercase();
        if !matches!(method.as_str(), "GET" | "POST" | "PUT" | "PATCH" | "DELETE" | "HEAD") {
            return Err(HttpError::InvalidRequest(format!(
                "Invalid HTTP method: {method}"
            )));
        }

        let headers = args
            .get("headers")
            .and_then(|h| h.as_object())
            .map(|h| {
                h.iter()
                    .map(|(k, v)| {
                        let v = v.as_str().map(String::from).unwrap_or_else(|| v.to_string());
                        (k.clone(), v)
                    })
                    .collect()
            })
            .unwrap_or_default();

        let body = match args.get("body") {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        };

        Ok(Self {
            method,
            url: url.to_string(),
            headers,
            body,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The body parsed as JSON, or the raw string when it is not JSON.
    pub fn body_value(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap_or_else(|_| serde_json::Value::String(self.body.clone()))
    }
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_minimal_request() {
        let req = HttpRequest::from_json(&json!({"url": "https://example.com"})).unwrap();
        assert_eq!(req.method, "GET");
        assert!(req.body.is_none());
    }

    #[test]
    fn json_body_is_serialized() {
        let req = HttpRequest::from_json(&json!({
            "url": "https://example.com/api",
            "method": "post",
            "headers": {"x-id": 7},
            "body": {"a": 1}
        }))
        .unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.headers["x-id"], "7");
        assert_eq!(req.body.as_deref(), Some(r#"{"a":1}"#));
    }

    #[test]
    fn rejects_bad_scheme_and_method() {
        assert!(HttpRequest::from_json(&json!({"url": "ftp://x"})).is_err());
        assert!(HttpRequest::from_json(&json!({"url": "http://x", "method": "BREW"})).is_err());
    }

    #[test]
    fn body_value_falls_back_to_string() {
        let resp = HttpResponse {
            status: 200,
            body: "plain".into(),
        };
        assert_eq!(resp.body_value(), json!("plain"));
        assert!(resp.is_success());
    }
}
