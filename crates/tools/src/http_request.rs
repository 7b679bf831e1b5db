//! HTTP request tool, plus the reqwest-backed [`HttpClient`].
//!
//! The tool itself only parses arguments and shapes the response; the
//! actual network call goes through whatever `HttpClient` was injected.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use taskloom_core::error::{HttpError, ToolError};
use taskloom_core::http::{HttpClient, HttpRequest, HttpResponse};
use taskloom_core::tool::{Tool, ToolParameter};
use tracing::debug;

pub struct HttpRequestTool {
    client: Arc<dyn HttpClient>,
}

impl HttpRequestTool {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for HttpRequestTool {
    fn name(&self) -> &str {
        "http_request"
    }

    fn description(&self) -> &str {
        "Make an HTTP request to a URL. Supports GET, POST, PUT, PATCH, DELETE and HEAD. \
         Returns the response status code and body."
    }

    fn category(&self) -> &str {
        "network"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("url", "string", "The URL to send the request to"),
            ToolParameter::optional("method", "string", "HTTP method, defaults to GET"),
            ToolParameter::optional("headers", "object", "HTTP headers as key-value pairs"),
            ToolParameter::optional("body", "string", "Request body (for POST, PUT, PATCH)"),
        ]
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let request = HttpRequest::from_json(&arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        let response = self
            .client
            .send(request)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "http_request".into(),
                reason: e.to_string(),
            })?;

        if response.status >= 400 {
            return Err(ToolError::ExecutionFailed {
                tool_name: "http_request".into(),
                reason: format!("HTTP {}: {}", response.status, response.body),
            });
        }

        Ok(serde_json::json!({
            "status": response.status,
            "body": response.body_value(),
        }))
    }
}

/// [`HttpClient`] backed by `reqwest`.
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("taskloom/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| HttpError::InvalidRequest(e.to_string()))?;

        debug!(method = %method, url = %request.url, "Sending HTTP request");

        let mut builder = self.client.request(method, &request.url);
        for (k, v) in &request.headers {
            builder = builder.header(k, v);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                HttpError::Timeout {
                    url: request.url.clone(),
                }
            } else {
                HttpError::RequestFailed {
                    url: request.url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| HttpError::RequestFailed {
                url: request.url.clone(),
                reason: e.to_string(),
            })?;

        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records requests and answers with a canned response.
    struct CannedClient {
        response: HttpResponse,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl CannedClient {
        fn new(status: u16, body: &str) -> Arc<Self> {
            Arc::new(Self {
                response: HttpResponse {
                    status,
                    body: body.into(),
                },
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl HttpClient for CannedClient {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
            self.seen.lock().unwrap().push(request);
            Ok(self.response.clone())
        }
    }

    #[tokio::test]
    async fn get_request_returns_status_and_json_body() {
        let client = CannedClient::new(200, r#"{"ok":true}"#);
        let tool = HttpRequestTool::new(client.clone());

        let result = tool
            .execute(serde_json::json!({"url": "https://api.example.com/health"}))
            .await
            .unwrap();

        assert_eq!(result["status"], 200);
        assert_eq!(result["body"]["ok"], true);
        assert_eq!(client.seen.lock().unwrap()[0].method, "GET");
    }

    #[tokio::test]
    async fn error_status_is_tool_failure() {
        let tool = HttpRequestTool::new(CannedClient::new(503, "down"));
        let err = tool
            .execute(serde_json::json!({"url": "https://api.example.com"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn invalid_url_rejected() {
        let tool = HttpRequestTool::new(CannedClient::new(200, ""));
        let result = tool
            .execute(serde_json::json!({"url": "not-a-url"}))
            .await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }

    #[test]
    fn tool_definition() {
        let tool = HttpRequestTool::new(CannedClient::new(200, ""));
        let schema = tool.parameters_schema();
        assert_eq!(schema["required"], serde_json::json!(["url"]));
        assert!(schema["properties"]["method"].is_object());
    }
}
