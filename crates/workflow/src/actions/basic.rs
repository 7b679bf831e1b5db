//! `log`, `set_variable` and `branch`.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, error, info, trace, warn};

use super::{ActionHandler, required_str};
use crate::condition;
use crate::context::WorkflowContext;
use crate::error::ActionError;

pub struct LogAction;

#[async_trait]
impl ActionHandler for LogAction {
    fn name(&self) -> &str {
        "log"
    }

    fn description(&self) -> &str {
        "Write a message to the log. Params: message, level (trace|debug|info|warn|error)"
    }

    async fn run(&self, ctx: &mut WorkflowContext, params: Value) -> Result<Value, ActionError> {
        let message = match &params["message"] {
            Value::String(s) => s.clone(),
            Value::Null => return Err(ActionError::InvalidParams("missing 'message'".into())),
            other => other.to_string(),
        };
        let level = params["level"].as_str().unwrap_or("info");
        let run_id = ctx.run_id.as_str();
        let workflow = ctx.workflow.as_str();

        match level {
            "trace" => trace!(run_id, workflow, "{message}"),
            "debug" => debug!(run_id, workflow, "{message}"),
            "info" => info!(run_id, workflow, "{message}"),
            "warn" | "warning" => warn!(run_id, workflow, "{message}"),
            "error" => error!(run_id, workflow, "{message}"),
            other => {
                return Err(ActionError::InvalidParams(format!("unknown log level '{other}'")));
            }
        }
        Ok(json!({"message": message, "level": level}))
    }
}

/// Params: `{name, value}` or `{variables: {k: v, ...}}`.
pub struct SetVariableAction;

#[async_trait]
impl ActionHandler for SetVariableAction {
    fn name(&self) -> &str {
        "set_variable"
    }

    fn description(&self) -> &str {
        "Set run variables. Params: name + value, or variables (object)"
    }

    async fn run(&self, ctx: &mut WorkflowContext, params: Value) -> Result<Value, ActionError> {
        if let Some(vars) = params["variables"].as_object() {
            for (k, v) in vars {
                ctx.set_variable(k.clone(), v.clone());
            }
            return Ok(Value::Object(vars.clone()));
        }

        let name = required_str(&params, "name")?;
        let value = params.get("value").cloned().unwrap_or(Value::Null);
        ctx.set_variable(name, value.clone());
        Ok(value)
    }
}

/// Params: `{condition, then?, else?}`. Output `{taken, value}`.
pub struct BranchAction;

#[async_trait]
impl ActionHandler for BranchAction {
    fn name(&self) -> &str {
        "branch"
    }

    fn description(&self) -> &str {
        "Evaluate a boolean condition and return the 'then' or 'else' value"
    }

    async fn run(&self, ctx: &mut WorkflowContext, params: Value) -> Result<Value, ActionError> {
        let taken = match &params["condition"] {
            Value::Bool(b) => *b,
            Value::String(s) => condition::evaluate(s, &ctx.scope()).map_err(ActionError::Condition)?,
            Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
            Value::Null => return Err(ActionError::InvalidParams("missing 'condition'".into())),
            other => {
                return Err(ActionError::InvalidParams(format!(
                    "condition must be a string or boolean, got {other}"
                )));
            }
        };
        let key = if taken { "then" } else { "else" };
        Ok(json!({
            "taken": taken,
            "branch": key,
            "value": params.get(key).cloned().unwrap_or(Value::Null),
        }))
    }
}
