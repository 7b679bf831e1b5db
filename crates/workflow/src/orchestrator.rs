//! The workflow orchestrator: runs definitions and tracks their runs.
//!
//! Run lifecycle: `Pending → Running → (Completed | Failed | Cancelled)`.
//! Each run is driven by one task; the run table keeps a snapshot that is
//! refreshed at every step transition, so [`WorkflowOrchestrator::status`]
//! shows progress while a detached run is still going.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use taskloom_core::event::{DomainEvent, EventBus};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::actions::{ActionHandler, ActionInfo, ActionRegistry};
use crate::condition;
use crate::context::WorkflowContext;
use crate::definition::{OnError, WorkflowDefinition, WorkflowStep};
use crate::error::{ActionError, WorkflowError};

/// Default per-step timeout.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub name: String,
    pub action: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
}

impl StepResult {
    fn pending(step: &WorkflowStep) -> Self {
        Self {
            name: step.name.clone(),
            action: step.action.clone(),
            status: StepStatus::Pending,
            output: None,
            error: None,
            attempts: 0,
            started_at: None,
            finished_at: None,
            duration_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub run_id: String,
    pub workflow: String,
    pub status: RunStatus,
    /// One entry per definition step, in order
    pub steps: Vec<StepResult>,
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
}

impl WorkflowResult {
    fn new(run_id: String, workflow: &str) -> Self {
        Self {
            run_id,
            workflow: workflow.to_string(),
            status: RunStatus::Pending,
            steps: Vec::new(),
            output: Value::Null,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            duration_ms: 0,
        }
    }

    pub fn step(&self, name: &str) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.name == name)
    }
}

/// Summary row for [`WorkflowOrchestrator::list_workflows`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInfo {
    pub name: String,
    pub description: String,
    pub steps: usize,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

struct RunEntry {
    result: WorkflowResult,
    cancel: CancellationToken,
}

type RunTable = Arc<RwLock<HashMap<String, RunEntry>>>;

/// Declarative multi-step runner.
///
/// Cheap to clone; clones share the definition table and the run table.
#[derive(Clone)]
pub struct WorkflowOrchestrator {
    actions: Arc<ActionRegistry>,
    workflows: Arc<RwLock<HashMap<String, Arc<WorkflowDefinition>>>>,
    runs: RunTable,
    default_timeout: Duration,
    event_bus: Option<Arc<EventBus>>,
}

impl WorkflowOrchestrator {
    pub fn new(actions: Arc<ActionRegistry>) -> Self {
        Self {
            actions,
            workflows: Arc::new(RwLock::new(HashMap::new())),
            runs: Arc::new(RwLock::new(HashMap::new())),
            default_timeout: DEFAULT_STEP_TIMEOUT,
            event_bus: None,
        }
    }

    /// Timeout for steps that do not set their own.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    // ── Definitions ──

    /// Validate and register a definition, replacing any with the same name.
    pub async fn register_workflow(&self, definition: WorkflowDefinition) -> Result<(), WorkflowError> {
        definition.validate()?;
        let unknown = self.unknown_actions(&definition);
        if !unknown.is_empty() {
            warn!(
                workflow = %definition.name,
                actions = ?unknown,
                "Workflow references unregistered actions"
            );
        }
        info!(workflow = %definition.name, steps = definition.steps.len(), "Workflow registered");
        self.workflows
            .write()
            .await
            .insert(definition.name.clone(), Arc::new(definition));
        Ok(())
    }

    /// Top-level step actions with no registered handler.
    pub fn unknown_actions(&self, definition: &WorkflowDefinition) -> Vec<String> {
        definition
            .steps
            .iter()
            .filter(|s| !self.actions.contains(&s.action))
            .map(|s| s.action.clone())
            .collect()
    }

    pub async fn get_workflow(&self, name: &str) -> Option<Arc<WorkflowDefinition>> {
        self.workflows.read().await.get(name).cloned()
    }

    /// Registered workflows, sorted by name.
    pub async fn list_workflows(&self) -> Vec<WorkflowInfo> {
        let mut list: Vec<WorkflowInfo> = self
            .workflows
            .read()
            .await
            .values()
            .map(|d| WorkflowInfo {
                name: d.name.clone(),
                description: d.description.clone(),
                steps: d.steps.len(),
                inputs: d.inputs.clone(),
                outputs: d.outputs.clone(),
            })
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub fn list_actions(&self) -> Vec<ActionInfo> {
        self.actions.list()
    }

    // ── Runs ──

    /// Run a registered workflow to completion.
    pub async fn execute(&self, name: &str, payload: Value) -> WorkflowResult {
        let (run_id, cancel) = self.create_run(name).await;
        self.drive(run_id, name.to_string(), payload, cancel).await
    }

    /// Start a registered workflow in the background and return its run id.
    pub async fn execute_detached(&self, name: &str, payload: Value) -> String {
        let (run_id, cancel) = self.create_run(name).await;
        let orchestrator = self.clone();
        let id = run_id.clone();
        let workflow = name.to_string();
        tokio::spawn(async move {
            orchestrator.drive(id, workflow, payload, cancel).await;
        });
        run_id
    }

    /// Snapshot of a run.
    pub async fn status(&self, run_id: &str) -> Option<WorkflowResult> {
        self.runs.read().await.get(run_id).map(|e| e.result.clone())
    }

    /// Snapshots of every tracked run, oldest first.
    pub async fn list_runs(&self) -> Vec<WorkflowResult> {
        let mut runs: Vec<WorkflowResult> = self
            .runs
            .read()
            .await
            .values()
            .map(|e| e.result.clone())
            .collect();
        runs.sort_by_key(|r| r.created_at);
        runs
    }

    /// Request cancellation. Returns `false` for unknown or finished runs.
    pub async fn cancel(&self, run_id: &str) -> bool {
        let runs = self.runs.read().await;
        match runs.get(run_id) {
            Some(entry) if !entry.result.status.is_terminal() => {
                info!(run_id, "Cancelling workflow run");
                entry.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Drop a finished run from the table.
    pub async fn remove_run(&self, run_id: &str) -> Result<WorkflowResult, WorkflowError> {
        let mut runs = self.runs.write().await;
        match runs.get(run_id) {
            None => Err(WorkflowError::RunNotFound(run_id.to_string())),
            Some(entry) if !entry.result.status.is_terminal() => {
                Err(WorkflowError::RunActive(run_id.to_string()))
            }
            Some(_) => runs
                .remove(run_id)
                .map(|e| e.result)
                .ok_or_else(|| WorkflowError::RunNotFound(run_id.to_string())),
        }
    }

    /// Drop finished runs older than `max_age`; returns how many went.
    pub async fn cleanup_finished(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::zero());
        let mut runs = self.runs.write().await;
        let before = runs.len();
        runs.retain(|_, entry| {
            let finished_before_cutoff = entry
                .result
                .finished_at
                .is_some_and(|at| at <= cutoff);
            !(entry.result.status.is_terminal() && finished_before_cutoff)
        });
        let removed = before - runs.len();
        debug!(removed, "Cleaned up finished runs");
        removed
    }

    async fn create_run(&self, workflow: &str) -> (String, CancellationToken) {
        let run_id = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        self.runs.write().await.insert(
            run_id.clone(),
            RunEntry {
                result: WorkflowResult::new(run_id.clone(), workflow),
                cancel: cancel.clone(),
            },
        );
        self.publish(&run_id, workflow, RunStatus::Pending);
        (run_id, cancel)
    }

    async fn drive(
        &self,
        run_id: String,
        workflow: String,
        payload: Value,
        cancel: CancellationToken,
    ) -> WorkflowResult {
        let start = Instant::now();
        let mut result = WorkflowResult::new(run_id.clone(), &workflow);
        if let Some(existing) = self.status(&run_id).await {
            result.created_at = existing.created_at;
        }
        result.started_at = Some(Utc::now());

        let Some(definition) = self.get_workflow(&workflow).await else {
            warn!(workflow = %workflow, "Workflow not found");
            result.error = Some(WorkflowError::NotFound(workflow).to_string());
            return self.finish(result, RunStatus::Failed, start).await;
        };

        result.steps = definition.steps.iter().map(StepResult::pending).collect();
        result.status = RunStatus::Running;
        self.store(&result).await;
        self.publish(&run_id, &workflow, RunStatus::Running);
        info!(run_id = %run_id, workflow = %workflow, steps = definition.steps.len(), "Workflow run started");

        let mut ctx = WorkflowContext::new(
            run_id.clone(),
            workflow.clone(),
            payload,
            Arc::clone(&self.actions),
            cancel.clone(),
        );

        for (index, step) in definition.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(run_id = %run_id, step = %step.name, "Run cancelled before step");
                return self.finish(result, RunStatus::Cancelled, start).await;
            }

            let step_start = Instant::now();
            result.steps[index].status = StepStatus::Running;
            result.steps[index].started_at = Some(Utc::now());
            self.store(&result).await;

            let outcome = self.run_step(&definition, step, &mut ctx, &cancel).await;
            let record = &mut result.steps[index];
            record.finished_at = Some(Utc::now());
            record.duration_ms = step_start.elapsed().as_millis() as u64;

            match outcome {
                StepOutcome::Skipped => {
                    debug!(step = %step.name, "Step skipped, condition is false");
                    record.status = StepStatus::Skipped;
                }
                StepOutcome::Completed { output, attempts } => {
                    debug!(step = %step.name, attempts, "Step completed");
                    record.status = StepStatus::Completed;
                    record.attempts = attempts;
                    record.output = Some(output.clone());
                    ctx.record_output(step.name.clone(), output);
                }
                StepOutcome::Failed { error, attempts } => {
                    record.status = StepStatus::Failed;
                    record.attempts = attempts;
                    record.error = Some(error.to_string());

                    if matches!(error, ActionError::Cancelled) {
                        return self.finish(result, RunStatus::Cancelled, start).await;
                    }
                    if definition.policy_for(step) == OnError::Continue {
                        warn!(step = %step.name, error = %error, "Step failed, continuing");
                    } else {
                        warn!(step = %step.name, error = %error, "Step failed, halting run");
                        result.error = Some(format!("step '{}' failed: {error}", step.name));
                        return self.finish(result, RunStatus::Failed, start).await;
                    }
                }
                StepOutcome::Fatal(error) => {
                    warn!(step = %step.name, error = %error, "Workflow run aborted");
                    record.status = StepStatus::Failed;
                    record.error = Some(error.to_string());
                    result.error = Some(error.to_string());
                    return self.finish(result, RunStatus::Failed, start).await;
                }
            }
            self.store(&result).await;
        }

        if cancel.is_cancelled() {
            return self.finish(result, RunStatus::Cancelled, start).await;
        }
        result.output = ctx.project_outputs(&definition.outputs);
        self.finish(result, RunStatus::Completed, start).await
    }

    async fn run_step(
        &self,
        definition: &WorkflowDefinition,
        step: &WorkflowStep,
        ctx: &mut WorkflowContext,
        cancel: &CancellationToken,
    ) -> StepOutcome {
        if let Some(cond) = &step.condition {
            match condition::evaluate(cond, &ctx.scope()) {
                Ok(true) => {}
                Ok(false) => return StepOutcome::Skipped,
                Err(e) => {
                    return StepOutcome::Failed {
                        error: ActionError::Condition(e),
                        attempts: 0,
                    };
                }
            }
        }

        let Some(handler) = self.actions.get(&step.action) else {
            return StepOutcome::Fatal(WorkflowError::UnknownAction {
                step: step.name.clone(),
                action: step.action.clone(),
            });
        };

        let params = if handler.templated_params() {
            ctx.resolve(&step.params)
        } else {
            step.params.clone()
        };
        let timeout = step
            .timeout
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);
        let max_attempts = match definition.policy_for(step) {
            OnError::Retry => step.max_retries.saturating_add(1),
            OnError::Fail | OnError::Continue => 1,
        };

        let mut attempts = 0;
        loop {
            attempts += 1;
            debug!(step = %step.name, action = %step.action, attempt = attempts, "Running step");
            let error = match attempt(handler.as_ref(), ctx, params.clone(), timeout, cancel).await {
                Ok(output) => return StepOutcome::Completed { output, attempts },
                Err(e) => e,
            };

            if matches!(error, ActionError::Cancelled) || attempts >= max_attempts {
                return StepOutcome::Failed { error, attempts };
            }
            warn!(
                step = %step.name,
                attempt = attempts,
                max_attempts,
                error = %error,
                "Step attempt failed, retrying"
            );
        }
    }

    async fn finish(
        &self,
        mut result: WorkflowResult,
        status: RunStatus,
        start: Instant,
    ) -> WorkflowResult {
        result.status = status;
        result.finished_at = Some(Utc::now());
        result.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            run_id = %result.run_id,
            workflow = %result.workflow,
            status = %status,
            duration_ms = result.duration_ms,
            "Workflow run finished"
        );
        self.store(&result).await;
        self.publish(&result.run_id, &result.workflow, status);
        result
    }

    async fn store(&self, result: &WorkflowResult) {
        if let Some(entry) = self.runs.write().await.get_mut(&result.run_id) {
            entry.result = result.clone();
        }
    }

    fn publish(&self, run_id: &str, workflow: &str, status: RunStatus) {
        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::WorkflowRunChanged {
                run_id: run_id.to_string(),
                workflow: workflow.to_string(),
                status: status.to_string(),
                timestamp: Utc::now(),
            });
        }
    }
}

enum StepOutcome {
    Skipped,
    Completed { output: Value, attempts: u32 },
    Failed { error: ActionError, attempts: u32 },
    Fatal(WorkflowError),
}

/// One handler call, bounded by `timeout` and abandoned on cancellation.
/// A panicking handler counts as a failed attempt.
async fn attempt(
    handler: &dyn ActionHandler,
    ctx: &mut WorkflowContext,
    params: Value,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Value, ActionError> {
    let call = AssertUnwindSafe(handler.run(ctx, params)).catch_unwind();
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ActionError::Cancelled),
        result = tokio::time::timeout(timeout, call) => match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_panic)) => Err(ActionError::Failed("action panicked".into())),
            Err(_) => Err(ActionError::Timeout(timeout)),
        },
    }
}
