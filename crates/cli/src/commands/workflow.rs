//! `taskloom workflow`: Run and validate workflow definition files.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;
use taskloom_workflow::{
    ActionRegistry, ActionServices, RunStatus, StepStatus, WorkflowDefinition, WorkflowOrchestrator,
    WorkflowResult,
};

use super::runtime::{self, CliResult};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub async fn run(file: PathBuf, payload: Option<String>, detach: bool) -> CliResult<()> {
    let config = runtime::load_config()?;
    let payload = parse_payload(payload.as_deref())?;

    let definition = WorkflowDefinition::from_file(&file)?;
    let name = definition.name.clone();

    let actions = runtime::action_registry(&config, runtime::optional_provider(&config))?;
    let orchestrator = runtime::orchestrator(&config, actions).await?;
    orchestrator.register_workflow(definition).await?;

    println!("🚀 Running workflow '{name}'");
    let result = if detach {
        let run_id = orchestrator.execute_detached(&name, payload).await;
        println!("   Run ID: {run_id}  (Ctrl-C to cancel)");
        watch(&orchestrator, &run_id).await?
    } else {
        orchestrator.execute(&name, payload).await
    };

    print_result(&result);
    match result.status {
        RunStatus::Completed => Ok(()),
        status => Err(result
            .error
            .unwrap_or_else(|| format!("workflow {status}"))
            .into()),
    }
}

/// Poll a detached run until it finishes, cancelling it on Ctrl-C.
async fn watch(orchestrator: &WorkflowOrchestrator, run_id: &str) -> CliResult<WorkflowResult> {
    let mut interrupted = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                if orchestrator.cancel(run_id).await {
                    println!("   ⏹  Cancelling...");
                }
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }

        let snapshot = orchestrator
            .status(run_id)
            .await
            .ok_or_else(|| format!("run {run_id} disappeared"))?;
        if snapshot.status.is_terminal() {
            return Ok(snapshot);
        }
    }
}

pub async fn validate(file: PathBuf) -> CliResult<()> {
    println!("🔍 Validating {}...", file.display());

    let definition = match WorkflowDefinition::from_file(&file) {
        Ok(d) => d,
        Err(e) => {
            println!("   ❌ {e}");
            return Err(e.into());
        }
    };
    if let Err(e) = definition.validate() {
        println!("   ❌ {e}");
        return Err(e.into());
    }
    println!("   ✅ '{}' parsed, {} step(s)", definition.name, definition.steps.len());

    // Service-less registry: only names matter here.
    let actions = ActionRegistry::with_builtins(ActionServices::default());
    let unknown: Vec<String> = definition
        .steps
        .iter()
        .filter(|s| !actions.contains(&s.action))
        .map(|s| format!("step '{}' uses unknown action '{}'", s.name, s.action))
        .collect();

    if unknown.is_empty() {
        println!("   ✅ All actions are registered");
        Ok(())
    } else {
        for warning in &unknown {
            println!("   ⚠️  {warning}");
        }
        Err(format!("{} step(s) reference unknown actions", unknown.len()).into())
    }
}

fn parse_payload(raw: Option<&str>) -> CliResult<Value> {
    let Some(raw) = raw else {
        return Ok(Value::Object(Default::default()));
    };
    let value: Value =
        serde_json::from_str(raw).map_err(|e| format!("--payload is not valid JSON: {e}"))?;
    if !value.is_object() {
        return Err("--payload must be a JSON object".into());
    }
    Ok(value)
}

fn print_result(result: &WorkflowResult) {
    for step in &result.steps {
        let mark = match step.status {
            StepStatus::Completed => "✅",
            StepStatus::Failed => "❌",
            StepStatus::Skipped => "⏭ ",
            StepStatus::Running => "⏳",
            StepStatus::Pending => "· ",
        };
        let retries = if step.attempts > 1 {
            format!(" ({} attempts)", step.attempts)
        } else {
            String::new()
        };
        println!("   {mark} {} [{}]{retries}", step.name, step.action);
        if let Some(error) = &step.error {
            println!("        {error}");
        }
    }
    println!();
    println!(
        "{} in {} ms (run {})",
        result.status, result.duration_ms, result.run_id
    );
    if !result.output.is_null() {
        match serde_json::to_string_pretty(&result.output) {
            Ok(text) => println!("{text}"),
            Err(e) => tracing::warn!(error = %e, "Could not render workflow output"),
        }
    }
}
