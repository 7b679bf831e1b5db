//! `search`: top-k hits from the retrieval service.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use taskloom_core::retrieval::Retriever;

use super::{ActionHandler, required_str};
use crate::context::WorkflowContext;
use crate::error::ActionError;

const DEFAULT_TOP_K: usize = 5;

/// Params: `{query, top_k?}`. Output: `{query, hits: [{id, content, score, metadata}]}`.
pub struct SearchAction {
    retriever: Option<Arc<dyn Retriever>>,
}

impl SearchAction {
    pub fn new(retriever: Option<Arc<dyn Retriever>>) -> Self {
        Self { retriever }
    }
}

#[async_trait]
impl ActionHandler for SearchAction {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search the knowledge corpus. Params: query, top_k"
    }

    async fn run(&self, _ctx: &mut WorkflowContext, params: Value) -> Result<Value, ActionError> {
        let retriever = self
            .retriever
            .as_ref()
            .ok_or_else(|| ActionError::Unavailable("no retrieval service configured".into()))?;
        let query = required_str(&params, "query")?;
        let top_k = match &params["top_k"] {
            Value::Number(n) => n.as_u64().map_or(DEFAULT_TOP_K, |n| n as usize),
            Value::String(s) => s.trim().parse().unwrap_or(DEFAULT_TOP_K),
            _ => DEFAULT_TOP_K,
        }
        .max(1);

        let hits = retriever.search(query, top_k).await?;
        Ok(json!({
            "query": query,
            "hits": hits,
        }))
    }
}
