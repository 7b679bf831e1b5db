//! Per-run workflow state.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::actions::ActionRegistry;
use crate::template::{self, Scope};

/// State owned by one workflow run.
///
/// `parallel` branches get clones, so their variable writes stay local.
#[derive(Clone)]
pub struct WorkflowContext {
    pub run_id: String,
    pub workflow: String,
    pub payload: Value,
    pub variables: Map<String, Value>,
    pub step_outputs: Map<String, Value>,
    actions: Arc<ActionRegistry>,
    cancel: CancellationToken,
}

impl WorkflowContext {
    pub fn new(
        run_id: impl Into<String>,
        workflow: impl Into<String>,
        payload: Value,
        actions: Arc<ActionRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            workflow: workflow.into(),
            payload,
            variables: Map::new(),
            step_outputs: Map::new(),
            actions,
            cancel,
        }
    }

    pub fn scope(&self) -> Scope<'_> {
        Scope {
            steps: &self.step_outputs,
            variables: &self.variables,
            payload: &self.payload,
        }
    }

    pub fn resolve(&self, params: &Value) -> Value {
        template::resolve_value(params, &self.scope())
    }

    pub fn resolve_str(&self, text: &str) -> String {
        template::resolve_str(text, &self.scope())
    }

    pub fn lookup(&self, path: &str) -> Option<&Value> {
        self.scope().lookup(path)
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    pub fn record_output(&mut self, step: impl Into<String>, output: Value) {
        self.step_outputs.insert(step.into(), output);
    }

    pub fn actions(&self) -> &Arc<ActionRegistry> {
        &self.actions
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The run output: declared paths, or everything when none are declared.
    pub fn project_outputs(&self, declared: &[String]) -> Value {
        if declared.is_empty() {
            return serde_json::json!({
                "variables": self.variables,
                "steps": self.step_outputs,
            });
        }
        let map = declared
            .iter()
            .map(|path| (path.clone(), self.lookup(path).cloned().unwrap_or(Value::Null)))
            .collect();
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> WorkflowContext {
        WorkflowContext::new(
            "run-1",
            "wf",
            json!({"user": "ada"}),
            Arc::new(ActionRegistry::new()),
            CancellationToken::new(),
        )
    }

    #[test]
    fn outputs_are_visible_to_templates() {
        let mut ctx = ctx();
        ctx.record_output("fetch", json!({"status": 200}));
        ctx.set_variable("greeting", json!("hi"));
        assert_eq!(ctx.resolve_str("{{fetch.status}} {{greeting}} {{user}}"), "200 hi ada");
    }

    #[test]
    fn projects_declared_outputs() {
        let mut ctx = ctx();
        ctx.set_variable("greeting", json!("hi"));
        let out = ctx.project_outputs(&["greeting".into(), "missing".into()]);
        assert_eq!(out, json!({"greeting": "hi", "missing": null}));

        let all = ctx.project_outputs(&[]);
        assert_eq!(all["variables"]["greeting"], "hi");
        assert!(all["steps"].as_object().is_some_and(|m| m.is_empty()));
    }

    #[test]
    fn clones_do_not_share_writes() {
        let ctx = ctx();
        let mut branch = ctx.clone();
        branch.set_variable("x", json!(1));
        assert!(ctx.variables.is_empty());
    }
}
