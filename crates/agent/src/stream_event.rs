//! Streaming events for the agent engines.
//!
//! `run_stream` on either engine returns an `mpsc::Receiver` of these. The
//! engine stops at its next emission once the receiver is dropped.

use serde::{Deserialize, Serialize};

use crate::plan::{PlanStatus, PlanStep};
use crate::react::ExecutionStatus;

/// Events emitted by [`AgentLoop::run_stream`](crate::AgentLoop::run_stream).
///
/// - `thinking`: a completion is being requested
/// - `tool_call`: the model asked for a tool
/// - `tool_result`: the tool finished
/// - `answer`: the final answer text
/// - `done`: terminal summary
/// - `error`: the run failed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    Thinking { iteration: u32 },

    ToolCall {
        iteration: u32,
        tool: String,
        arguments: serde_json::Value,
    },

    ToolResult {
        iteration: u32,
        tool: String,
        success: bool,
        output: String,
    },

    Answer { content: String },

    Done {
        status: ExecutionStatus,
        iterations: u32,
        tools_used: Vec<String>,
        total_tokens: u32,
        latency_ms: u64,
    },

    Error { message: String },
}

impl AgentStreamEvent {
    /// SSE-style event name.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Thinking { .. } => "thinking",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Answer { .. } => "answer",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}

/// Progress events emitted by
/// [`PlanExecuteAgent::run_stream`](crate::PlanExecuteAgent::run_stream).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlanStreamEvent {
    Planning { task: String },

    PlanCreated {
        goal: String,
        revision: u32,
        steps: Vec<PlanStep>,
    },

    StepStarted { step_number: u32, description: String },

    StepCompleted { step_number: u32, result: String },

    StepFailed { step_number: u32, error: String },

    Replanning {
        revision: u32,
        failed_step: u32,
        error: String,
    },

    Synthesizing,

    Answer { content: String },

    /// Terminal failure; no synthesis follows.
    Failed { error: String },

    Done { status: PlanStatus, replans: u32 },
}

impl PlanStreamEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Planning { .. } => "planning",
            Self::PlanCreated { .. } => "plan_created",
            Self::StepStarted { .. } => "step_started",
            Self::StepCompleted { .. } => "step_completed",
            Self::StepFailed { .. } => "step_failed",
            Self::Replanning { .. } => "replanning",
            Self::Synthesizing => "synthesizing",
            Self::Answer { .. } => "answer",
            Self::Failed { .. } => "failed",
            Self::Done { .. } => "done",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_event_serialization() {
        let event = AgentStreamEvent::ToolCall {
            iteration: 1,
            tool: "calculator".into(),
            arguments: serde_json::json!({"expression": "2+2"}),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"tool_call""#));
        assert!(json.contains(r#""tool":"calculator""#));
        assert_eq!(event.event_type(), "tool_call");
    }

    #[test]
    fn agent_done_serialization() {
        let event = AgentStreamEvent::Done {
            status: ExecutionStatus::Completed,
            iterations: 2,
            tools_used: vec!["calculator".into()],
            total_tokens: 30,
            latency_ms: 5,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"done""#));
        assert!(json.contains(r#""status":"completed""#));
    }

    #[test]
    fn agent_event_deserialization() {
        let json = r#"{"type":"answer","content":"4"}"#;
        match serde_json::from_str::<AgentStreamEvent>(json).unwrap() {
            AgentStreamEvent::Answer { content } => assert_eq!(content, "4"),
            other => panic!("Wrong variant: {other:?}"),
        }
    }

    #[test]
    fn plan_event_names() {
        assert_eq!(PlanStreamEvent::Synthesizing.event_type(), "synthesizing");
        assert_eq!(
            PlanStreamEvent::Failed {
                error: "x".into()
            }
            .event_type(),
            "failed"
        );
        let json = serde_json::to_string(&PlanStreamEvent::StepStarted {
            step_number: 1,
            description: "look".into(),
        })
        .unwrap();
        assert!(json.contains(r#""type":"step_started""#));
    }
}
