//! `http`: outbound HTTP through the injected [`HttpClient`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use taskloom_core::http::{HttpClient, HttpRequest};
use tracing::debug;

use super::ActionHandler;
use crate::context::WorkflowContext;
use crate::error::ActionError;

/// Params: `{url, method?, headers?, body?, allow_error_status?}`.
/// Output: `{status, body}` with a JSON body decoded when possible.
pub struct HttpAction {
    client: Option<Arc<dyn HttpClient>>,
}

impl HttpAction {
    pub fn new(client: Option<Arc<dyn HttpClient>>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ActionHandler for HttpAction {
    fn name(&self) -> &str {
        "http"
    }

    fn description(&self) -> &str {
        "Send an HTTP request. Params: url, method, headers, body, allow_error_status"
    }

    async fn run(&self, _ctx: &mut WorkflowContext, params: Value) -> Result<Value, ActionError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| ActionError::Unavailable("no HTTP client configured".into()))?;
        let request =
            HttpRequest::from_json(&params).map_err(|e| ActionError::InvalidParams(e.to_string()))?;
        debug!(method = %request.method, url = %request.url, "Workflow HTTP call");

        let response = client.send(request).await?;
        let allow_errors = params["allow_error_status"].as_bool().unwrap_or(false);
        if response.status >= 400 && !allow_errors {
            return Err(ActionError::Failed(format!(
                "HTTP {}: {}",
                response.status, response.body
            )));
        }

        Ok(json!({
            "status": response.status,
            "body": response.body_value(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionRegistry;
    use std::sync::Mutex;
    use taskloom_core::error::HttpError;
    use taskloom_core::http::HttpResponse;
    use tokio_util::sync::CancellationToken;

    struct CannedClient {
        status: u16,
        body: &'static str,
        seen: Mutex<Vec<HttpRequest>>,
    }

    #[async_trait]
    impl HttpClient for CannedClient {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
            self.seen.lock().unwrap().push(request);
            Ok(HttpResponse {
                status: self.status,
                body: self.body.into(),
            })
        }
    }

    fn ctx() -> WorkflowContext {
        WorkflowContext::new(
            "r",
            "w",
            Value::Null,
            Arc::new(ActionRegistry::new()),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn sends_request_and_decodes_body() {
        let client = Arc::new(CannedClient {
            status: 200,
            body: r#"{"ok": true}"#,
            seen: Mutex::new(Vec::new()),
        });
        let action = HttpAction::new(Some(client.clone() as Arc<dyn HttpClient>));
        let out = action
            .run(
                &mut ctx(),
                json!({"url": "https://api.example.com/x", "method": "post", "body": {"a": 1}}),
            )
            .await
            .unwrap();
        assert_eq!(out["status"], 200);
        assert_eq!(out["body"]["ok"], true);

        let seen = client.seen.lock().unwrap();
        assert_eq!(seen[0].method, "POST");
        assert_eq!(seen[0].body.as_deref(), Some(r#"{"a":1}"#));
    }

    #[tokio::test]
    async fn error_status_fails_unless_allowed() {
        let client = Arc::new(CannedClient {
            status: 503,
            body: "down",
            seen: Mutex::new(Vec::new()),
        });
        let action = HttpAction::new(Some(client as Arc<dyn HttpClient>));
        let params = json!({"url": "https://api.example.com"});
        assert!(action.run(&mut ctx(), params.clone()).await.is_err());

        let mut allowed = params;
        allowed["allow_error_status"] = json!(true);
        let out = action.run(&mut ctx(), allowed).await.unwrap();
        assert_eq!(out["status"], 503);
    }

    #[tokio::test]
    async fn missing_client_is_unavailable() {
        let err = HttpAction::new(None)
            .run(&mut ctx(), json!({"url": "https://x.io"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Unavailable(_)));
    }
}
