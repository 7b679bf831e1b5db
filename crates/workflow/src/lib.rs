//! Workflow engine: declarative multi-step runs.
//!
//! A [`WorkflowDefinition`] lists named steps, each invoking a registered
//! action with templated params. The [`WorkflowOrchestrator`] runs them in
//! order with conditions, per-step timeouts, retry/continue/fail policies
//! and cancellation, and keeps every run in an in-memory table.
//!
//! ```text
//! definition ──▶ orchestrator ──▶ run task ──▶ step ──▶ ActionRegistry ──▶ handler
//!                     │                          │
//!                     └── run table (RwLock) ◀───┘ snapshot per transition
//! ```

pub mod actions;
pub mod condition;
pub mod context;
pub mod definition;
pub mod error;
pub mod orchestrator;
pub mod template;

pub use actions::{ActionHandler, ActionInfo, ActionRegistry, ActionServices};
pub use context::WorkflowContext;
pub use definition::{OnError, WorkflowDefinition, WorkflowStep};
pub use error::{ActionError, WorkflowError};
pub use orchestrator::{
    RunStatus, StepResult, StepStatus, WorkflowInfo, WorkflowOrchestrator, WorkflowResult,
};
