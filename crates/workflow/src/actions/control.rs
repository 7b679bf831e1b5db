//! `parallel` and `loop`: actions that invoke other actions.

use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::join_all;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::ActionHandler;
use crate::context::WorkflowContext;
use crate::error::ActionError;

/// Params: `{branches: [{action, params?, name?}], fail_on_error?}`.
///
/// Branches run concurrently on clones of the run context; each result is
/// captured as `{name, action, success, output | error}`. A panicking
/// branch is captured as a failed one. A failed branch only fails the step
/// when `fail_on_error` is set.
pub struct ParallelAction;

#[async_trait]
impl ActionHandler for ParallelAction {
    fn name(&self) -> &str {
        "parallel"
    }

    fn description(&self) -> &str {
        "Run several actions concurrently. Params: branches [{action, params, name}], fail_on_error"
    }

    async fn run(&self, ctx: &mut WorkflowContext, params: Value) -> Result<Value, ActionError> {
        let branches = params["branches"]
            .as_array()
            .ok_or_else(|| ActionError::InvalidParams("missing array 'branches'".into()))?;
        debug!(branches = branches.len(), "Fanning out");

        let shared: &WorkflowContext = ctx;
        let futures = branches.iter().enumerate().map(|(i, branch)| {
            let name = branch["name"]
                .as_str()
                .map(String::from)
                .unwrap_or_else(|| format!("branch_{i}"));
            let action = branch["action"].as_str().unwrap_or_default().to_string();
            let branch_params = branch.get("params").cloned().unwrap_or_else(|| json!({}));
            let handler = shared.actions().get(&action);
            let mut branch_ctx = shared.clone();

            async move {
                let result = match handler {
                    Some(handler) => {
                        match AssertUnwindSafe(handler.run(&mut branch_ctx, branch_params))
                            .catch_unwind()
                            .await
                        {
                            Ok(result) => result,
                            Err(panic) => Err(ActionError::Failed(format!(
                                "branch panicked: {}",
                                panic_reason(panic.as_ref())
                            ))),
                        }
                    }
                    None => Err(ActionError::InvalidParams(format!(
                        "unknown action '{action}'"
                    ))),
                };
                (name, action, result)
            }
        });
        let results = join_all(futures).await;

        let mut failed = Vec::new();
        let outputs: Vec<Value> = results
            .into_iter()
            .map(|(name, action, result)| match result {
                Ok(output) => json!({
                    "name": name,
                    "action": action,
                    "success": true,
                    "output": output,
                }),
                Err(e) => {
                    warn!(branch = %name, error = %e, "Parallel branch failed");
                    failed.push(format!("{name}: {e}"));
                    json!({
                        "name": name,
                        "action": action,
                        "success": false,
                        "error": e.to_string(),
                    })
                }
            })
            .collect();

        if !failed.is_empty() && params["fail_on_error"].as_bool().unwrap_or(false) {
            return Err(ActionError::Failed(format!(
                "{} of {} branches failed: {}",
                failed.len(),
                outputs.len(),
                failed.join("; ")
            )));
        }
        Ok(Value::Array(outputs))
    }
}

fn panic_reason(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown cause")
}

/// Params: `{items, action, params?, as?, index_as?, continue_on_error?}`.
///
/// Runs `action` once per element, in order. Each iteration sees the
/// element as `{{item}}` (or the `as` name) and its position as
/// `{{index}}`; `params` are templated per iteration. `items` may be an
/// array, a placeholder naming one, or a JSON-encoded array string.
pub struct LoopAction;

#[async_trait]
impl ActionHandler for LoopAction {
    fn name(&self) -> &str {
        "loop"
    }

    fn description(&self) -> &str {
        "Invoke one action per list element. Params: items, action, params, as, continue_on_error"
    }

    fn templated_params(&self) -> bool {
        false
    }

    async fn run(&self, ctx: &mut WorkflowContext, params: Value) -> Result<Value, ActionError> {
        let items = resolve_items(ctx, &params["items"])?;
        let action = params["action"]
            .as_str()
            .map(|a| ctx.resolve_str(a))
            .ok_or_else(|| ActionError::InvalidParams("missing string 'action'".into()))?;
        let handler = ctx
            .actions()
            .get(&action)
            .ok_or_else(|| ActionError::InvalidParams(format!("unknown action '{action}'")))?;

        let item_var = params["as"].as_str().unwrap_or("item").to_string();
        let index_var = params["index_as"].as_str().unwrap_or("index").to_string();
        let continue_on_error = params["continue_on_error"].as_bool().unwrap_or(false);
        let raw_params = params.get("params").cloned().unwrap_or_else(|| json!({}));

        let saved_item = ctx.variables.get(&item_var).cloned();
        let saved_index = ctx.variables.get(&index_var).cloned();

        let mut outputs = Vec::with_capacity(items.len());
        let mut outcome = Ok(());
        for (index, item) in items.into_iter().enumerate() {
            if ctx.is_cancelled() {
                outcome = Err(ActionError::Cancelled);
                break;
            }
            ctx.set_variable(item_var.clone(), item);
            ctx.set_variable(index_var.clone(), json!(index));

            let iteration_params = if handler.templated_params() {
                ctx.resolve(&raw_params)
            } else {
                raw_params.clone()
            };
            match handler.run(ctx, iteration_params).await {
                Ok(output) => outputs.push(output),
                Err(e) if continue_on_error => {
                    warn!(index, error = %e, "Loop iteration failed, continuing");
                    outputs.push(json!({"index": index, "error": e.to_string()}));
                }
                Err(e) => {
                    outcome = Err(ActionError::Failed(format!("iteration {index} failed: {e}")));
                    break;
                }
            }
        }

        restore(ctx, &item_var, saved_item);
        restore(ctx, &index_var, saved_index);
        outcome.map(|()| Value::Array(outputs))
    }
}

fn resolve_items(ctx: &WorkflowContext, raw: &Value) -> Result<Vec<Value>, ActionError> {
    match ctx.resolve(raw) {
        Value::Array(items) => Ok(items),
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(Value::Array(items)) => Ok(items),
            _ => Err(ActionError::InvalidParams(format!(
                "'items' did not resolve to a list: {s}"
            ))),
        },
        Value::Null => Err(ActionError::InvalidParams("missing 'items'".into())),
        other => Err(ActionError::InvalidParams(format!(
            "'items' must be a list, got {other}"
        ))),
    }
}

fn restore(ctx: &mut WorkflowContext, name: &str, previous: Option<Value>) {
    match previous {
        Some(value) => ctx.set_variable(name, value),
        None => {
            ctx.variables.remove(name);
        }
    }
}
