//! The bounded tool-use loop shared by `AgentLoop` and plan steps.

use std::sync::Arc;

use chrono::Utc;
use taskloom_core::event::{DomainEvent, EventBus};
use taskloom_core::message::Message;
use taskloom_core::provider::{Provider, ProviderRequest, ProviderResponse};
use taskloom_core::tool::{ToolCallRecord, ToolOutcome, ToolRegistry};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::parser::{ToolRequest, parse_tool_calls};
use crate::prompts;
use crate::react::{AgentStep, StepState};
use crate::stream_event::AgentStreamEvent;

/// Send `event` if there is a listener. `false` means the receiver is gone.
pub(crate) async fn emit<E>(sink: Option<&mpsc::Sender<E>>, event: E) -> bool {
    match sink {
        Some(tx) => tx.send(event).await.is_ok(),
        None => true,
    }
}

/// One completion, abandoned if `cancel` fires first.
pub(crate) async fn complete_cancellable(
    provider: &dyn Provider,
    request: ProviderRequest,
    cancel: &CancellationToken,
) -> Result<ProviderResponse, String> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(taskloom_core::Error::Cancelled.to_string()),
        result = provider.complete(request) => result.map_err(|e| e.to_string()),
    }
}

/// Model/tool wiring shared by the engines.
#[derive(Clone)]
pub(crate) struct Engine {
    pub provider: Arc<dyn Provider>,
    pub tools: Arc<ToolRegistry>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub event_bus: Option<Arc<EventBus>>,
    pub cancel: CancellationToken,
}

impl Engine {
    pub fn request(&self, model: &str, messages: Vec<Message>) -> ProviderRequest {
        ProviderRequest::new(model, messages)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
    }

    /// Request one completion, publishing usage.
    pub async fn complete(
        &self,
        model: &str,
        messages: Vec<Message>,
    ) -> Result<ProviderResponse, String> {
        let request = self.request(model, messages);
        let response =
            complete_cancellable(self.provider.as_ref(), request, &self.cancel).await?;

        if let (Some(bus), Some(usage)) = (&self.event_bus, &response.usage) {
            bus.publish(DomainEvent::ResponseGenerated {
                model: response.model.clone(),
                tokens_used: usage.total_tokens,
                timestamp: Utc::now(),
            });
        }
        Ok(response)
    }

    async fn execute_tool(&self, request: &ToolRequest) -> ToolOutcome {
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            outcome = self.tools.execute(&request.tool, request.arguments.clone()) => Some(outcome),
        };
        let outcome = outcome.unwrap_or_else(|| ToolOutcome {
            success: false,
            result: None,
            error: Some(taskloom_core::Error::Cancelled.to_string()),
            duration_ms: 0,
        });

        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::ToolExecuted {
                tool_name: request.tool.clone(),
                success: outcome.success,
                duration_ms: outcome.duration_ms,
                timestamp: Utc::now(),
            });
        }
        outcome
    }

    /// Run the loop over `messages` for at most `max_iterations` completions.
    pub async fn run_loop(
        &self,
        model: &str,
        mut messages: Vec<Message>,
        max_iterations: u32,
        sink: Option<&mpsc::Sender<AgentStreamEvent>>,
    ) -> LoopRecord {
        let mut record = LoopRecord::default();

        for iteration in 1..=max_iterations.max(1) {
            if !emit(sink, AgentStreamEvent::Thinking { iteration }).await {
                record.end = LoopEnd::Stopped;
                return record;
            }
            record.iterations = iteration;
            debug!(iteration, model, "Tool loop iteration");

            let response = match self.complete(model, messages.clone()).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(iteration, error = %e, "Completion failed");
                    record.steps.push(AgentStep::new(StepState::Error, e.clone()));
                    record.end = LoopEnd::Failed(e);
                    return record;
                }
            };

            if let Some(usage) = response.usage {
                record.total_tokens += usage.total_tokens;
            }
            let content = response.message.content.clone();
            record.last_content = content.clone();
            record
                .steps
                .push(AgentStep::new(StepState::Thinking, content.clone()));

            let requests = parse_tool_calls(&content);
            if requests.is_empty() {
                record.end = LoopEnd::Answer;
                return record;
            }

            let mut results = Vec::with_capacity(requests.len());
            for request in requests {
                if !emit(
                    sink,
                    AgentStreamEvent::ToolCall {
                        iteration,
                        tool: request.tool.clone(),
                        arguments: request.arguments.clone(),
                    },
                )
                .await
                {
                    record.end = LoopEnd::Stopped;
                    return record;
                }
                record.steps.push(AgentStep::new(
                    StepState::ToolCall,
                    format!("{} {}", request.tool, request.arguments),
                ));

                let outcome = self.execute_tool(&request).await;
                if self.cancel.is_cancelled() {
                    let msg = taskloom_core::Error::Cancelled.to_string();
                    record.steps.push(AgentStep::new(StepState::Error, msg.clone()));
                    record.end = LoopEnd::Failed(msg);
                    return record;
                }

                record.note_tool(&request.tool);
                let output = outcome.output_text();
                let mut step = AgentStep::new(StepState::ToolResult, output.clone());
                step.tool_calls.push(ToolCallRecord {
                    tool: request.tool.clone(),
                    arguments: request.arguments.clone(),
                    outcome: outcome.clone(),
                    timestamp: Utc::now(),
                });
                record.steps.push(step);

                if !emit(
                    sink,
                    AgentStreamEvent::ToolResult {
                        iteration,
                        tool: request.tool.clone(),
                        success: outcome.success,
                        output,
                    },
                )
                .await
                {
                    record.end = LoopEnd::Stopped;
                    return record;
                }
                results.push((request, outcome));
            }

            messages.push(Message::assistant(content));
            messages.push(Message::user(prompts::tool_results(&results)));
        }

        warn!(max_iterations, "Tool loop exhausted its iteration budget");
        record.end = LoopEnd::Exhausted;
        record
    }
}

/// How a tool loop ended.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) enum LoopEnd {
    /// A response with no tool requests; `last_content` is the answer.
    Answer,
    /// Every allowed iteration asked for tools.
    #[default]
    Exhausted,
    /// Completion failed or the run was cancelled.
    Failed(String),
    /// The stream receiver was dropped.
    Stopped,
}

#[derive(Debug, Default)]
pub(crate) struct LoopRecord {
    pub steps: Vec<AgentStep>,
    pub tools_used: Vec<String>,
    pub total_tokens: u32,
    pub iterations: u32,
    pub last_content: String,
    pub end: LoopEnd,
}

impl LoopRecord {
    fn note_tool(&mut self, name: &str) {
        if !self.tools_used.iter().any(|t| t == name) {
            self.tools_used.push(name.to_string());
        }
    }
}
