//! `llm`: one completion from the reasoning service.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use taskloom_core::message::Message;
use taskloom_core::provider::{Provider, ProviderRequest};
use tracing::debug;

use super::{ActionHandler, required_str};
use crate::context::WorkflowContext;
use crate::error::ActionError;

/// Params: `{prompt, system?, model?, temperature?, max_tokens?}`.
/// Output: `{content, model, total_tokens}`.
pub struct LlmAction {
    provider: Option<Arc<dyn Provider>>,
    default_model: String,
}

impl LlmAction {
    pub fn new(provider: Option<Arc<dyn Provider>>, default_model: impl Into<String>) -> Self {
        Self {
            provider,
            default_model: default_model.into(),
        }
    }
}

#[async_trait]
impl ActionHandler for LlmAction {
    fn name(&self) -> &str {
        "llm"
    }

    fn description(&self) -> &str {
        "Ask the language model. Params: prompt, system, model, temperature, max_tokens"
    }

    async fn run(&self, _ctx: &mut WorkflowContext, params: Value) -> Result<Value, ActionError> {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| ActionError::Unavailable("no reasoning service configured".into()))?;
        let prompt = required_str(&params, "prompt")?;

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = params["system"].as_str() {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(prompt));

        let max_tokens = params["max_tokens"]
            .as_u64()
            .map(|n| {
                u32::try_from(n)
                    .map_err(|_| ActionError::InvalidParams(format!("max_tokens {n} out of range")))
            })
            .transpose()?;

        let model = params["model"].as_str().unwrap_or(&self.default_model);
        let mut request = ProviderRequest::new(model, messages).with_max_tokens(max_tokens);
        if let Some(t) = params["temperature"].as_f64() {
            request = request.with_temperature(t as f32);
        }

        debug!(model, "Workflow LLM call");
        let response = provider.complete(request).await?;
        Ok(json!({
            "content": response.message.content,
            "model": response.model,
            "total_tokens": response.usage.map(|u| u.total_tokens),
        }))
    }
}
