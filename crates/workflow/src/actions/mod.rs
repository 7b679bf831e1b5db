//! Workflow actions: named async handlers invoked by steps.
//!
//! An [`ActionRegistry`] is built once at composition time and shared by
//! every run through an `Arc`. Built-ins:
//!
//! | action         | does                                              |
//! |----------------|---------------------------------------------------|
//! | `log`          | emit a `tracing` event                            |
//! | `set_variable` | write run variables                               |
//! | `branch`       | evaluate a condition, pick `then` or `else`       |
//! | `http`         | outbound HTTP through [`HttpClient`]              |
//! | `parallel`     | run sub-actions concurrently, capture each result |
//! | `loop`         | run one action per element of a list              |
//! | `llm`          | one completion from the reasoning service         |
//! | `search`       | top-k hits from the retrieval service             |

mod basic;
mod control;
mod http;
mod llm;
mod search;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use taskloom_core::http::HttpClient;
use taskloom_core::provider::Provider;
use taskloom_core::retrieval::Retriever;
use tracing::debug;

use crate::context::WorkflowContext;
use crate::error::ActionError;

pub use basic::{BranchAction, LogAction, SetVariableAction};
pub use control::{LoopAction, ParallelAction};
pub use http::HttpAction;
pub use llm::LlmAction;
pub use search::SearchAction;

/// A named step handler.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Whether the orchestrator resolves `{{...}}` in params before the
    /// call. Handlers that template per element (like `loop`) opt out.
    fn templated_params(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &mut WorkflowContext, params: Value) -> Result<Value, ActionError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionInfo {
    pub name: String,
    pub description: String,
}

/// Collaborators for the service-backed built-ins. Actions whose service is
/// missing are still registered and fail with [`ActionError::Unavailable`].
#[derive(Clone, Default)]
pub struct ActionServices {
    pub http: Option<Arc<dyn HttpClient>>,
    pub provider: Option<Arc<dyn Provider>>,
    pub model: String,
    pub retriever: Option<Arc<dyn Retriever>>,
}

impl ActionServices {
    pub fn with_http(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http = Some(client);
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        self.provider = Some(provider);
        self.model = model.into();
        self
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }
}

/// Name → handler table. Insertion order is kept for listing; a repeated
/// name replaces the handler in place.
#[derive(Default)]
pub struct ActionRegistry {
    handlers: Vec<Arc<dyn ActionHandler>>,
    index: HashMap<String, usize>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in action.
    pub fn with_builtins(services: ActionServices) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(LogAction));
        registry.register(Arc::new(SetVariableAction));
        registry.register(Arc::new(BranchAction));
        registry.register(Arc::new(HttpAction::new(services.http)));
        registry.register(Arc::new(ParallelAction));
        registry.register(Arc::new(LoopAction));
        registry.register(Arc::new(LlmAction::new(services.provider, services.model)));
        registry.register(Arc::new(SearchAction::new(services.retriever)));
        registry
    }

    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) {
        let name = handler.name().to_string();
        match self.index.get(&name) {
            Some(&slot) => {
                debug!(action = %name, "Replacing registered action");
                self.handlers[slot] = handler;
            }
            None => {
                self.index.insert(name, self.handlers.len());
                self.handlers.push(handler);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ActionHandler>> {
        self.index.get(name).map(|&i| Arc::clone(&self.handlers[i]))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn list(&self) -> Vec<ActionInfo> {
        self.handlers
            .iter()
            .map(|h| ActionInfo {
                name: h.name().to_string(),
                description: h.description().to_string(),
            })
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }
}

/// Look up a required string param.
pub(crate) fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, ActionError> {
    params[key]
        .as_str()
        .ok_or_else(|| ActionError::InvalidParams(format!("missing string '{key}'")))
}
