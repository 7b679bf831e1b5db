//! The agent engines of Taskloom.
//!
//! Two engines share one bounded tool loop:
//!
//! - [`AgentLoop`] follows a **Reason → Act → Observe** cycle:
//!   1. Send the task and the tool catalog to the model
//!   2. **If the reply asks for tools**: run them in order, append the
//!      results, and loop back to step 1
//!   3. **Otherwise**: the reply is the answer
//!
//!   The loop stops at the answer or at `max_iterations`.
//!
//! - [`PlanExecuteAgent`] asks the model for a plan, runs each step as its
//!   own tool loop, replans on failure, and synthesizes a final answer.
//!
//! Tool requests live in the reply text (see [`parse_tool_calls`]), so any
//! chat-completion model works as the reasoning service.

pub mod parser;
pub mod plan;
pub mod plan_execute;
pub mod prompts;
pub mod react;
pub mod stream_event;
mod tool_loop;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use parser::{ToolRequest, parse_tool_calls};
pub use plan::{Plan, PlanStatus, PlanStep, StepStatus};
pub use plan_execute::{PlanExecuteAgent, PlanRequest, PlanResult};
pub use react::{AgentLoop, AgentRequest, AgentStep, ExecutionResult, ExecutionStatus, StepState};
pub use stream_event::{AgentStreamEvent, PlanStreamEvent};
