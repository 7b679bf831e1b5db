//! Workflow error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that fail a workflow invocation or registration.
#[derive(Debug, Clone, Error)]
pub enum WorkflowError {
    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Unknown action '{action}' in step '{step}'")]
    UnknownAction { step: String, action: String },

    #[error("Invalid workflow definition: {0}")]
    InvalidDefinition(String),

    #[error("Failed to load workflow from {path}: {reason}")]
    Load { path: String, reason: String },

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Run {0} is still active")]
    RunActive(String),
}

/// Errors raised by an action handler. Always recorded on the step, never
/// propagated out of a run.
#[derive(Debug, Clone, Error)]
pub enum ActionError {
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Action failed: {0}")]
    Failed(String),

    #[error("Step timed out after {0:?}")]
    Timeout(Duration),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Condition error: {0}")]
    Condition(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl From<taskloom_core::error::HttpError> for ActionError {
    fn from(e: taskloom_core::error::HttpError) -> Self {
        Self::Failed(e.to_string())
    }
}

impl From<taskloom_core::error::RetrievalError> for ActionError {
    fn from(e: taskloom_core::error::RetrievalError) -> Self {
        Self::Failed(e.to_string())
    }
}

impl From<taskloom_core::error::ProviderError> for ActionError {
    fn from(e: taskloom_core::error::ProviderError) -> Self {
        Self::Failed(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages() {
        let err = WorkflowError::UnknownAction {
            step: "fetch".into(),
            action: "teleport".into(),
        };
        assert_eq!(err.to_string(), "Unknown action 'teleport' in step 'fetch'");
        assert_eq!(
            ActionError::Timeout(Duration::from_secs(5)).to_string(),
            "Step timed out after 5s"
        );
        assert_eq!(
            ActionError::Timeout(Duration::from_millis(20)).to_string(),
            "Step timed out after 20ms"
        );
    }
}
