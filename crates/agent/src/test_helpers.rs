//! Shared test helpers for engine tests.

use std::sync::{Arc, Mutex};

use taskloom_core::error::ProviderError;
use taskloom_core::message::Message;
use taskloom_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use taskloom_core::tool::ToolRegistry;
use taskloom_tools::CalculatorTool;

/// A mock provider that returns a sequence of scripted results.
///
/// Each call to `complete` returns the next entry in the queue and records
/// the request. Panics if more calls are made than results provided.
pub struct SequentialMockProvider {
    results: Vec<Result<ProviderResponse, ProviderError>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self::with_results(responses.into_iter().map(Ok).collect())
    }

    /// Script a mix of responses and provider errors.
    pub fn with_results(results: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            results,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a provider that returns a single text response (no tool calls).
    pub fn single_text(text: &str) -> Self {
        Self::new(vec![make_text_response(text)])
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut requests = self.requests.lock().unwrap();
        let index = requests.len();
        if index >= self.results.len() {
            panic!(
                "SequentialMockProvider: no more responses (call #{}, have {})",
                index,
                self.results.len()
            );
        }
        requests.push(request);
        self.results[index].clone()
    }
}

/// A provider whose every call fails.
pub struct FailingProvider;

#[async_trait::async_trait]
impl Provider for FailingProvider {
    fn name(&self) -> &str {
        "failing"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(make_error())
    }
}

/// Create a simple text response.
pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

pub fn make_error() -> ProviderError {
    ProviderError::ApiError {
        status_code: 500,
        message: "upstream exploded".into(),
    }
}

/// Reply text containing one fenced tool request.
pub fn tool_call_text(name: &str, args: serde_json::Value) -> String {
    format!(
        "Let me use a tool.\n```tool_call\n{}\n```",
        serde_json::json!({"tool": name, "arguments": args})
    )
}

pub fn calculator_registry() -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(CalculatorTool));
    Arc::new(registry)
}
