//! ReAct pattern: Thought → Action → Observation loop.
//!
//! The model reasons over a tool catalog, asks for tools in its reply text,
//! sees their results, and eventually answers without a tool request.
//!
//! # Step ledger
//!
//! Each iteration records:
//! - **Thinking**: the model's raw reply
//! - **ToolCall** / **ToolResult**: one pair per requested tool, in order
//!
//! and the run ends with **Responding** (+ **Complete**) or **Error**.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taskloom_core::agent::{DEFAULT_MAX_ITERATIONS, ExhaustionPolicy};
use taskloom_core::event::EventBus;
use taskloom_core::message::Message;
use taskloom_core::provider::Provider;
use taskloom_core::tool::{ToolCallRecord, ToolRegistry};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::prompts;
use crate::stream_event::AgentStreamEvent;
use crate::tool_loop::{Engine, LoopEnd, emit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Thinking,
    ToolCall,
    ToolResult,
    Responding,
    Complete,
    Error,
}

/// One entry in the execution ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStep {
    pub state: StepState,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
    pub timestamp: DateTime<Utc>,
}

impl AgentStep {
    pub fn new(state: StepState, content: impl Into<String>) -> Self {
        Self {
            state,
            content: content.into(),
            tool_calls: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    /// Iterations ran out while the model still wanted tools
    Inconclusive,
    Failed,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Completed => "completed",
            Self::Inconclusive => "inconclusive",
            Self::Failed => "failed",
        })
    }
}

/// A task for [`AgentLoop`], with optional per-call overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentRequest {
    pub task: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
}

impl AgentRequest {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            ..Self::default()
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = Some(max);
        self
    }
}

/// The outcome of one [`AgentLoop`] run. Partial progress survives failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub answer: String,
    pub steps: Vec<AgentStep>,
    /// De-duplicated, first-seen order
    pub tools_used: Vec<String>,
    pub total_tokens: u32,
    pub latency_ms: u64,
    pub iterations: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Bounded reason-then-act executor.
#[derive(Clone)]
pub struct AgentLoop {
    engine: Engine,
    model: String,
    max_iterations: u32,
    exhaustion: ExhaustionPolicy,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            engine: Engine {
                provider,
                tools,
                temperature: 0.7,
                max_tokens: None,
                event_bus: None,
                cancel: CancellationToken::new(),
            },
            model: model.into(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            exhaustion: ExhaustionPolicy::default(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.engine.temperature = temperature;
        self
    }

    /// Set the default max tokens per completion.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.engine.max_tokens = Some(max);
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    pub fn with_exhaustion_policy(mut self, policy: ExhaustionPolicy) -> Self {
        self.exhaustion = policy;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.engine.event_bus = Some(bus);
        self
    }

    /// Outstanding completions and tool calls are abandoned when `token` fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.engine.cancel = token;
        self
    }

    /// Run the loop to completion.
    pub async fn run(&self, request: AgentRequest) -> ExecutionResult {
        self.drive(request, None).await
    }

    /// Streaming variant of [`run`](Self::run).
    ///
    /// The loop runs in a background task feeding the returned receiver.
    pub fn run_stream(&self, request: AgentRequest) -> mpsc::Receiver<AgentStreamEvent> {
        let (tx, rx) = mpsc::channel(128);
        let agent = self.clone();
        tokio::spawn(async move {
            agent.drive(request, Some(&tx)).await;
        });
        rx
    }

    async fn drive(
        &self,
        request: AgentRequest,
        sink: Option<&mpsc::Sender<AgentStreamEvent>>,
    ) -> ExecutionResult {
        let start = Instant::now();
        let model = request.model.as_deref().unwrap_or(&self.model).to_string();
        let max_iterations = request.max_iterations.unwrap_or(self.max_iterations).max(1);

        info!(model = %model, max_iterations, "ReAct loop starting");

        let messages = vec![
            Message::system(prompts::agent_system(
                &self.engine.tools,
                request.context.as_deref(),
            )),
            Message::user(&request.task),
        ];

        let mut record = self
            .engine
            .run_loop(&model, messages, max_iterations, sink)
            .await;

        let stopped = record.end == LoopEnd::Stopped;
        let (status, answer, error) = match std::mem::take(&mut record.end) {
            LoopEnd::Answer => (ExecutionStatus::Completed, record.last_content.clone(), None),
            LoopEnd::Exhausted => {
                let status = match self.exhaustion {
                    ExhaustionPolicy::BestEffort => ExecutionStatus::Completed,
                    ExhaustionPolicy::Inconclusive => ExecutionStatus::Inconclusive,
                };
                warn!(max_iterations, %status, "ReAct loop exhausted");
                (status, record.last_content.clone(), None)
            }
            LoopEnd::Failed(e) => (ExecutionStatus::Failed, String::new(), Some(e)),
            LoopEnd::Stopped => {
                info!("Stream receiver dropped, stopping");
                (
                    ExecutionStatus::Failed,
                    String::new(),
                    Some("stream receiver dropped".into()),
                )
            }
        };

        let mut steps = record.steps;
        if status != ExecutionStatus::Failed {
            steps.push(AgentStep::new(StepState::Responding, answer.clone()));
            if status == ExecutionStatus::Completed {
                steps.push(AgentStep::new(StepState::Complete, ""));
            }
        }

        let result = ExecutionResult {
            status,
            answer,
            steps,
            tools_used: record.tools_used,
            total_tokens: record.total_tokens,
            latency_ms: start.elapsed().as_millis() as u64,
            iterations: record.iterations,
            error,
        };

        info!(
            status = %result.status,
            iterations = result.iterations,
            tools = result.tools_used.len(),
            tokens = result.total_tokens,
            "ReAct loop finished"
        );

        if sink.is_some() && !stopped {
            let terminal = match &result.error {
                Some(message) => AgentStreamEvent::Error {
                    message: message.clone(),
                },
                None => AgentStreamEvent::Answer {
                    content: result.answer.clone(),
                },
            };
            if emit(sink, terminal).await {
                let _ = emit(
                    sink,
                    AgentStreamEvent::Done {
                        status: result.status,
                        iterations: result.iterations,
                        tools_used: result.tools_used.clone(),
                        total_tokens: result.total_tokens,
                        latency_ms: result.latency_ms,
                    },
                )
                .await;
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{
        FailingProvider, SequentialMockProvider, calculator_registry, make_text_response,
        tool_call_text,
    };
    use serde_json::json;

    fn agent(provider: Arc<dyn Provider>) -> AgentLoop {
        AgentLoop::new(provider, "mock-model", calculator_registry())
    }

    #[tokio::test]
    async fn direct_answer_without_tools() {
        let provider = Arc::new(SequentialMockProvider::single_text("Paris."));
        let result = agent(provider.clone())
            .run(AgentRequest::new("Capital of France?"))
            .await;

        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.answer, "Paris.");
        assert_eq!(result.iterations, 1);
        assert!(result.tools_used.is_empty());
        assert_eq!(result.total_tokens, 15);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn calculator_compute_two_plus_two() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_text_response(&tool_call_text("calculator", json!({"expression": "2+2"}))),
            make_text_response("2 + 2 = 4"),
        ]));
        let result = agent(provider.clone())
            .run(AgentRequest::new("compute 2+2"))
            .await;

        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.tools_used, vec!["calculator"]);

        let calls: Vec<&ToolCallRecord> =
            result.steps.iter().flat_map(|s| s.tool_calls.iter()).collect();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].outcome.success);
        assert_eq!(calls[0].outcome.output_text(), "4");
        assert_eq!(result.steps.last().unwrap().state, StepState::Complete);

        // Second request carries the tool results back to the model
        let requests = provider.requests();
        let feedback = &requests[1].messages.last().unwrap().content;
        assert!(feedback.contains("calculator (ok): 4"));
    }

    #[tokio::test]
    async fn system_prompt_lists_catalog_and_context() {
        let provider = Arc::new(SequentialMockProvider::single_text("ok"));
        agent(provider.clone())
            .run(AgentRequest::new("hi").with_context("User prefers metric units"))
            .await;

        let requests = provider.requests();
        let system = &requests[0].messages[0].content;
        assert!(system.contains("- calculator:"));
        assert!(system.contains("User prefers metric units"));
    }

    #[tokio::test]
    async fn terminates_within_max_iterations_best_effort() {
        let looping: Vec<_> = (0..10)
            .map(|_| make_text_response(&tool_call_text("calculator", json!({"expression": "1+1"}))))
            .collect();
        let provider = Arc::new(SequentialMockProvider::new(looping));
        let result = agent(provider.clone())
            .with_max_iterations(3)
            .run(AgentRequest::new("loop forever"))
            .await;

        assert_eq!(provider.call_count(), 3);
        assert_eq!(result.iterations, 3);
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert!(result.answer.contains("tool_call"));
    }

    #[tokio::test]
    async fn exhaustion_can_be_inconclusive() {
        let looping: Vec<_> = (0..4)
            .map(|_| make_text_response(&tool_call_text("calculator", json!({"expression": "1"}))))
            .collect();
        let provider = Arc::new(SequentialMockProvider::new(looping));
        let result = agent(provider)
            .with_exhaustion_policy(ExhaustionPolicy::Inconclusive)
            .run(AgentRequest::new("x").with_max_iterations(2))
            .await;

        assert_eq!(result.status, ExecutionStatus::Inconclusive);
        assert_eq!(result.iterations, 2);
        assert_ne!(result.steps.last().unwrap().state, StepState::Complete);
    }

    #[tokio::test]
    async fn multiple_requests_run_in_order_and_dedupe() {
        let text = format!(
            "{}\n{}",
            tool_call_text("calculator", json!({"expression": "1+1"})),
            tool_call_text("calculator", json!({"expression": "2*3"}))
        );
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_text_response(&text),
            make_text_response("2 and 6"),
        ]));
        let result = agent(provider).run(AgentRequest::new("both")).await;

        let outputs: Vec<String> = result
            .steps
            .iter()
            .flat_map(|s| s.tool_calls.iter())
            .map(|c| c.outcome.output_text())
            .collect();
        assert_eq!(outputs, vec!["2", "6"]);
        assert_eq!(result.tools_used, vec!["calculator"]);
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_not_raised() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_text_response(&tool_call_text("teleport", json!({}))),
            make_text_response("Could not teleport."),
        ]));
        let result = agent(provider).run(AgentRequest::new("go")).await;

        assert_eq!(result.status, ExecutionStatus::Completed);
        let call = result
            .steps
            .iter()
            .flat_map(|s| s.tool_calls.iter())
            .next()
            .unwrap();
        assert!(!call.outcome.success);
        assert!(call.outcome.error.as_deref().unwrap().contains("teleport"));
    }

    #[tokio::test]
    async fn provider_failure_returns_failed_result() {
        let result = agent(Arc::new(FailingProvider))
            .run(AgentRequest::new("anything"))
            .await;

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(result.error.is_some());
        assert_eq!(result.steps.last().unwrap().state, StepState::Error);
    }

    #[tokio::test]
    async fn cancelled_token_fails_run() {
        let token = CancellationToken::new();
        token.cancel();
        let provider = Arc::new(SequentialMockProvider::single_text("never"));
        let result = agent(provider.clone())
            .with_cancellation(token)
            .run(AgentRequest::new("x"))
            .await;

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(result.error.unwrap().contains("cancelled"));
    }

    #[tokio::test]
    async fn request_model_override_is_used() {
        let provider = Arc::new(SequentialMockProvider::single_text("ok"));
        agent(provider.clone())
            .run(AgentRequest::new("x").with_model("other-model"))
            .await;
        assert_eq!(provider.requests()[0].model, "other-model");
    }

    #[tokio::test]
    async fn stream_emits_transitions_in_order() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_text_response(&tool_call_text("calculator", json!({"expression": "2+2"}))),
            make_text_response("4"),
        ]));
        let mut rx = agent(provider).run_stream(AgentRequest::new("compute 2+2"));

        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            kinds.push(event.event_type());
        }
        assert_eq!(
            kinds,
            vec!["thinking", "tool_call", "tool_result", "thinking", "answer", "done"]
        );
    }

    #[tokio::test]
    async fn stream_reports_errors() {
        let mut rx = agent(Arc::new(FailingProvider)).run_stream(AgentRequest::new("x"));
        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            kinds.push(event.event_type());
        }
        assert_eq!(kinds, vec!["thinking", "error", "done"]);
    }

    #[tokio::test]
    async fn publishes_domain_events() {
        let bus = Arc::new(EventBus::new(16));
        let mut events = bus.subscribe();
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_text_response(&tool_call_text("calculator", json!({"expression": "1"}))),
            make_text_response("1"),
        ]));
        agent(provider)
            .with_event_bus(bus.clone())
            .run(AgentRequest::new("x"))
            .await;

        let mut tool_events = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(
                event.as_ref(),
                taskloom_core::DomainEvent::ToolExecuted { .. }
            ) {
                tool_events += 1;
            }
        }
        assert_eq!(tool_events, 1);
    }
}
