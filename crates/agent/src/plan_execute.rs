//! Plan-and-execute pattern: plan → execute each step → replan → synthesize.
//!
//! 1. **Plan**: the model proposes `{goal, steps}` for the task.
//! 2. **Execute**: steps run in list order; each is its own bounded tool
//!    loop, seeded with the goal and every result so far.
//! 3. **Replan**: a failed step triggers a fresh plan for the remaining
//!    work, at most `max_replans` times. Completed results carry over by
//!    step number.
//! 4. **Synthesize**: one final completion turns the step results into the
//!    answer.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use taskloom_core::agent::{DEFAULT_MAX_ITERATIONS, DEFAULT_MAX_REPLANS, ExhaustionPolicy};
use taskloom_core::event::{DomainEvent, EventBus};
use taskloom_core::message::Message;
use taskloom_core::provider::Provider;
use taskloom_core::tool::ToolRegistry;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::plan::{Plan, PlanStatus, PlanStep, StepStatus, first_unused};
use crate::prompts;
use crate::stream_event::PlanStreamEvent;
use crate::tool_loop::{Engine, LoopEnd, emit};

/// A task for [`PlanExecuteAgent`], with optional per-call overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanRequest {
    pub task: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub max_replans: Option<u32>,
}

impl PlanRequest {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_replans(mut self, max: u32) -> Self {
        self.max_replans = Some(max);
        self
    }
}

/// The outcome of one plan-and-execute run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanResult {
    pub status: PlanStatus,
    pub goal: String,
    /// Every executed step across all revisions, in execution order
    pub steps: Vec<PlanStep>,
    /// The plan as it stood at the end
    pub plan: Plan,
    pub final_result: Option<String>,
    pub replans: u32,
    pub tools_used: Vec<String>,
    pub total_tokens: u32,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct PlanExecuteAgent {
    engine: Engine,
    model: String,
    max_replans: u32,
    step_max_iterations: u32,
    exhaustion: ExhaustionPolicy,
}

/// Mutable bookkeeping for one run.
struct RunState {
    ledger: Vec<PlanStep>,
    completed: BTreeMap<u32, String>,
    tools_used: Vec<String>,
    total_tokens: u32,
    replans: u32,
}

impl RunState {
    fn note_tools(&mut self, tools: &[String]) {
        for tool in tools {
            if !self.tools_used.contains(tool) {
                self.tools_used.push(tool.clone());
            }
        }
    }
}

impl PlanExecuteAgent {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            engine: Engine {
                provider,
                tools,
                temperature: 0.7,
                max_tokens: None,
                event_bus: None,
                cancel: CancellationToken::new(),
            },
            model: model.into(),
            max_replans: DEFAULT_MAX_REPLANS,
            step_max_iterations: DEFAULT_MAX_ITERATIONS,
            exhaustion: ExhaustionPolicy::default(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.engine.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.engine.max_tokens = Some(max);
        self
    }

    pub fn with_max_replans(mut self, max: u32) -> Self {
        self.max_replans = max;
        self
    }

    /// Tool-loop bound for each step.
    pub fn with_step_max_iterations(mut self, max: u32) -> Self {
        self.step_max_iterations = max.max(1);
        self
    }

    /// `Inconclusive` makes a step that never stops asking for tools fail
    /// (and so trigger a replan) instead of keeping its last reply.
    pub fn with_exhaustion_policy(mut self, policy: ExhaustionPolicy) -> Self {
        self.exhaustion = policy;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.engine.event_bus = Some(bus);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.engine.cancel = token;
        self
    }

    pub async fn run(&self, request: PlanRequest) -> PlanResult {
        self.drive(request, None).await
    }

    /// Streaming variant of [`run`](Self::run).
    pub fn run_stream(&self, request: PlanRequest) -> mpsc::Receiver<PlanStreamEvent> {
        let (tx, rx) = mpsc::channel(128);
        let agent = self.clone();
        tokio::spawn(async move {
            agent.drive(request, Some(&tx)).await;
        });
        rx
    }

    async fn drive(
        &self,
        request: PlanRequest,
        sink: Option<&mpsc::Sender<PlanStreamEvent>>,
    ) -> PlanResult {
        let start = Instant::now();
        let model = request.model.as_deref().unwrap_or(&self.model).to_string();
        let max_replans = request.max_replans.unwrap_or(self.max_replans);
        let mut state = RunState {
            ledger: Vec::new(),
            completed: BTreeMap::new(),
            tools_used: Vec::new(),
            total_tokens: 0,
            replans: 0,
        };

        info!(model = %model, max_replans, "Plan-and-execute starting");

        // ── Plan ──
        emit(sink, PlanStreamEvent::Planning {
            task: request.task.clone(),
        })
        .await;

        let mut plan = match self.create_plan(&model, &request.task, &mut state).await {
            Ok(plan) => plan,
            Err(e) => {
                let plan = Plan::fallback(&request.task, 1);
                return self.finish_failed(plan, state, e, start, sink).await;
            }
        };
        info!(goal = %plan.goal, steps = plan.steps.len(), "Plan created");
        if !emit(sink, plan_created(&plan)).await {
            return self.stopped(plan, state, start);
        }

        // ── Execute / replan ──
        loop {
            plan.status = PlanStatus::InProgress;
            let mut failure: Option<(PlanStep, String)> = None;

            for idx in 0..plan.steps.len() {
                if plan.steps[idx].status == StepStatus::Completed {
                    continue;
                }
                if self.engine.cancel.is_cancelled() {
                    let e = taskloom_core::Error::Cancelled.to_string();
                    return self.finish_failed(plan, state, e, start, sink).await;
                }

                plan.steps[idx].start();
                let started = PlanStreamEvent::StepStarted {
                    step_number: plan.steps[idx].step_number,
                    description: plan.steps[idx].description.clone(),
                };
                if !emit(sink, started).await {
                    return self.stopped(plan, state, start);
                }

                let outcome = self
                    .execute_step(&model, &plan.goal, &plan.steps[idx], &mut state)
                    .await;
                let step = &mut plan.steps[idx];

                let event = match outcome {
                    Ok(output) => {
                        debug!(step = step.step_number, "Step completed");
                        state.completed.insert(step.step_number, output.clone());
                        step.complete(output.clone());
                        PlanStreamEvent::StepCompleted {
                            step_number: step.step_number,
                            result: output,
                        }
                    }
                    Err(e) => {
                        warn!(step = step.step_number, error = %e, "Step failed");
                        step.fail(e.clone());
                        failure = Some((step.clone(), e.clone()));
                        PlanStreamEvent::StepFailed {
                            step_number: step.step_number,
                            error: e,
                        }
                    }
                };
                state.ledger.push(step.clone());
                if !emit(sink, event).await {
                    return self.stopped(plan, state, start);
                }
                if failure.is_some() {
                    break;
                }
            }

            let Some((failed_step, error)) = failure else {
                break;
            };

            if self.engine.cancel.is_cancelled() {
                return self.finish_failed(plan, state, error, start, sink).await;
            }
            if state.replans >= max_replans {
                warn!(replans = state.replans, "Replan budget exhausted");
                let e = format!(
                    "step {} failed after {} replan(s): {error}",
                    failed_step.step_number, state.replans
                );
                return self.finish_failed(plan, state, e, start, sink).await;
            }

            // ── Replan ──
            state.replans += 1;
            plan.status = PlanStatus::Replanned;
            let replanning = PlanStreamEvent::Replanning {
                revision: plan.revision + 1,
                failed_step: failed_step.step_number,
                error: error.clone(),
            };
            if !emit(sink, replanning).await {
                return self.stopped(plan, state, start);
            }

            plan = self
                .replan(&model, &plan, &failed_step, &error, &mut state)
                .await;
            info!(revision = plan.revision, steps = plan.steps.len(), "Plan revised");

            if let Some(bus) = &self.engine.event_bus {
                bus.publish(DomainEvent::PlanRevised {
                    goal: plan.goal.clone(),
                    revision: plan.revision,
                    timestamp: Utc::now(),
                });
            }
            if !emit(sink, plan_created(&plan)).await {
                return self.stopped(plan, state, start);
            }
        }

        // ── Synthesize ──
        if !emit(sink, PlanStreamEvent::Synthesizing).await {
            return self.stopped(plan, state, start);
        }
        let messages = vec![
            Message::system(prompts::synthesis_system()),
            Message::user(prompts::synthesis_task(
                &plan.task,
                &plan.goal,
                &state.completed,
            )),
        ];
        let answer = match self.engine.complete(&model, messages).await {
            Ok(response) => {
                if let Some(usage) = response.usage {
                    state.total_tokens += usage.total_tokens;
                }
                response.message.content
            }
            Err(e) => return self.finish_failed(plan, state, e, start, sink).await,
        };

        plan.status = PlanStatus::Completed;
        info!(replans = state.replans, "Plan-and-execute completed");

        if emit(sink, PlanStreamEvent::Answer {
            content: answer.clone(),
        })
        .await
        {
            emit(sink, PlanStreamEvent::Done {
                status: PlanStatus::Completed,
                replans: state.replans,
            })
            .await;
        }

        self.result(plan, state, Some(answer), None, start)
    }

    async fn create_plan(
        &self,
        model: &str,
        task: &str,
        state: &mut RunState,
    ) -> Result<Plan, String> {
        let messages = vec![
            Message::system(prompts::planner_system(&self.engine.tools)),
            Message::user(prompts::planner_task(task)),
        ];
        let response = self.engine.complete(model, messages).await?;
        if let Some(usage) = response.usage {
            state.total_tokens += usage.total_tokens;
        }
        Ok(Plan::from_planner_output(task, &response.message.content, 1))
    }

    /// New plan for the remaining work. Never fails: unusable output (or a
    /// failed completion) yields one step numbered after the last completed.
    async fn replan(
        &self,
        model: &str,
        plan: &Plan,
        failed: &PlanStep,
        error: &str,
        state: &mut RunState,
    ) -> Plan {
        let completed = &state.completed;
        let next_number = completed.keys().next_back().map_or(1, |n| {
            first_unused(n.saturating_add(1), |k| completed.contains_key(&k))
        });
        let messages = vec![
            Message::system(prompts::planner_system(&self.engine.tools)),
            Message::user(prompts::replan_task(plan, failed, error, &state.completed)),
        ];

        let mut revised = match self.engine.complete(model, messages).await {
            Ok(response) => {
                if let Some(usage) = response.usage {
                    state.total_tokens += usage.total_tokens;
                }
                Plan::from_planner_output(&plan.task, &response.message.content, next_number)
            }
            Err(e) => {
                warn!(error = %e, "Replan request failed, using single-step plan");
                Plan::fallback(&plan.task, next_number)
            }
        };

        revised.goal = plan.goal.clone();
        revised.revision = plan.revision + 1;
        revised.reseed(&state.completed);
        revised
    }

    async fn execute_step(
        &self,
        model: &str,
        goal: &str,
        step: &PlanStep,
        state: &mut RunState,
    ) -> Result<String, String> {
        let messages = vec![
            Message::system(prompts::step_system(&self.engine.tools)),
            Message::user(prompts::step_task(goal, step, &state.completed)),
        ];

        let record = self
            .engine
            .run_loop(model, messages, self.step_max_iterations, None)
            .await;
        state.total_tokens += record.total_tokens;
        state.note_tools(&record.tools_used);

        match record.end {
            LoopEnd::Answer => Ok(record.last_content),
            LoopEnd::Exhausted => match self.exhaustion {
                ExhaustionPolicy::BestEffort => Ok(record.last_content),
                ExhaustionPolicy::Inconclusive => Err(format!(
                    "no final answer within {} iterations",
                    self.step_max_iterations
                )),
            },
            LoopEnd::Failed(e) => Err(e),
            LoopEnd::Stopped => Err("step stopped".into()),
        }
    }

    async fn finish_failed(
        &self,
        mut plan: Plan,
        state: RunState,
        error: String,
        start: Instant,
        sink: Option<&mpsc::Sender<PlanStreamEvent>>,
    ) -> PlanResult {
        plan.status = PlanStatus::Failed;
        warn!(error = %error, "Plan-and-execute failed");
        if emit(sink, PlanStreamEvent::Failed {
            error: error.clone(),
        })
        .await
        {
            emit(sink, PlanStreamEvent::Done {
                status: PlanStatus::Failed,
                replans: state.replans,
            })
            .await;
        }
        self.result(plan, state, None, Some(error), start)
    }

    fn stopped(&self, mut plan: Plan, state: RunState, start: Instant) -> PlanResult {
        info!("Stream receiver dropped, stopping");
        plan.status = PlanStatus::Failed;
        self.result(
            plan,
            state,
            None,
            Some("stream receiver dropped".into()),
            start,
        )
    }

    fn result(
        &self,
        plan: Plan,
        state: RunState,
        final_result: Option<String>,
        error: Option<String>,
        start: Instant,
    ) -> PlanResult {
        PlanResult {
            status: plan.status,
            goal: plan.goal.clone(),
            steps: state.ledger,
            plan,
            final_result,
            replans: state.replans,
            tools_used: state.tools_used,
            total_tokens: state.total_tokens,
            latency_ms: start.elapsed().as_millis() as u64,
            error,
        }
    }
}

fn plan_created(plan: &Plan) -> PlanStreamEvent {
    PlanStreamEvent::PlanCreated {
        goal: plan.goal.clone(),
        revision: plan.revision,
        steps: plan.steps.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{
        SequentialMockProvider, calculator_registry, make_error, make_text_response,
        tool_call_text,
    };
    use serde_json::json;

    fn agent(provider: Arc<dyn Provider>) -> PlanExecuteAgent {
        PlanExecuteAgent::new(provider, "mock-model", calculator_registry())
    }

    fn two_step_plan() -> String {
        r#"{"goal": "Add numbers", "steps": [
            {"step_number": 1, "description": "Compute 2+2", "tools_needed": ["calculator"]},
            {"step_number": 2, "description": "Double it", "tools_needed": ["calculator"]}
        ]}"#
        .into()
    }

    #[tokio::test]
    async fn happy_path_plans_executes_and_synthesizes() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_text_response(&two_step_plan()),
            // step 1
            make_text_response(&tool_call_text("calculator", json!({"expression": "2+2"}))),
            make_text_response("4"),
            // step 2
            make_text_response(&tool_call_text("calculator", json!({"expression": "4*2"}))),
            make_text_response("8"),
            // synthesis
            make_text_response("The answer is 8."),
        ]));
        let result = agent(provider.clone()).run(PlanRequest::new("2+2 doubled")).await;

        assert_eq!(result.status, PlanStatus::Completed);
        assert_eq!(result.goal, "Add numbers");
        assert_eq!(result.final_result.as_deref(), Some("The answer is 8."));
        assert_eq!(result.replans, 0);
        assert_eq!(result.steps.len(), 2);
        assert_eq!(result.steps[0].result.as_deref(), Some("4"));
        assert_eq!(result.tools_used, vec!["calculator"]);
        assert_eq!(provider.call_count(), 6);

        // Step 2 sees step 1's result
        let requests = provider.requests();
        assert!(requests[3].messages[1].content.contains("Step 1: 4"));
        // Synthesis sees both
        assert!(requests[5].messages[1].content.contains("Step 2: 8"));
    }

    #[tokio::test]
    async fn unparsable_plan_runs_single_step() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_text_response("I'd rather just chat."),
            make_text_response("done"),
            make_text_response("Final."),
        ]));
        let result = agent(provider).run(PlanRequest::new("whatever")).await;

        assert_eq!(result.plan.steps.len(), 1);
        assert_eq!(result.plan.steps[0].description, crate::plan::FALLBACK_STEP);
        assert_eq!(result.status, PlanStatus::Completed);
    }

    #[tokio::test]
    async fn failed_step_triggers_replan_and_keeps_completed_results() {
        let provider = Arc::new(SequentialMockProvider::with_results(vec![
            Ok(make_text_response(&two_step_plan())),
            Ok(make_text_response("4")), // step 1
            Err(make_error()),           // step 2 fails
            // replan: keeps step 1, replaces step 2
            Ok(make_text_response(
                r#"{"steps": [{"step_number": 1, "description": "Compute 2+2"},
                              {"step_number": 2, "description": "Multiply by two"}]}"#,
            )),
            Ok(make_text_response("8")), // new step 2 only
            Ok(make_text_response("It is 8.")),
        ]));
        let bus = Arc::new(EventBus::new(16));
        let mut events = bus.subscribe();
        let result = agent(provider.clone())
            .with_event_bus(bus.clone())
            .run(PlanRequest::new("x"))
            .await;

        assert_eq!(result.status, PlanStatus::Completed);
        assert_eq!(result.replans, 1);
        assert_eq!(result.plan.revision, 1);
        assert_eq!(provider.call_count(), 6);

        let statuses: Vec<(u32, StepStatus)> = result
            .steps
            .iter()
            .map(|s| (s.step_number, s.status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                (1, StepStatus::Completed),
                (2, StepStatus::Failed),
                (2, StepStatus::Completed)
            ]
        );
        assert_eq!(result.plan.steps[0].result.as_deref(), Some("4"));

        let mut revised = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event.as_ref(), DomainEvent::PlanRevised { .. }) {
                revised += 1;
            }
        }
        assert_eq!(revised, 1);
    }

    #[tokio::test]
    async fn replans_never_exceed_budget() {
        // Initial plan + two replans, every step fails
        let provider = Arc::new(SequentialMockProvider::with_results(vec![
            Ok(make_text_response("not json")),
            Err(make_error()),
            Ok(make_text_response("still not json")),
            Err(make_error()),
            Ok(make_text_response("nope")),
            Err(make_error()),
        ]));
        let result = agent(provider.clone())
            .with_max_replans(2)
            .run(PlanRequest::new("doomed"))
            .await;

        assert_eq!(result.status, PlanStatus::Failed);
        assert_eq!(result.replans, 2);
        assert!(result.final_result.is_none());
        assert!(result.error.is_some());
        assert_eq!(provider.call_count(), 6);
    }

    #[tokio::test]
    async fn zero_replans_fails_on_first_step_failure() {
        let provider = Arc::new(SequentialMockProvider::with_results(vec![
            Ok(make_text_response(&two_step_plan())),
            Err(make_error()),
        ]));
        let result = agent(provider.clone())
            .run(PlanRequest::new("x").with_max_replans(0))
            .await;
        assert_eq!(result.status, PlanStatus::Failed);
        assert_eq!(result.replans, 0);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn replan_fallback_numbers_after_completed() {
        let provider = Arc::new(SequentialMockProvider::with_results(vec![
            Ok(make_text_response(&two_step_plan())),
            Ok(make_text_response("4")),
            Err(make_error()),
            Ok(make_text_response("garbage")),
            Ok(make_text_response("recovered")),
            Ok(make_text_response("Final")),
        ]));
        let result = agent(provider).run(PlanRequest::new("x")).await;

        assert_eq!(result.status, PlanStatus::Completed);
        let numbers: Vec<u32> = result.plan.steps.iter().map(|s| s.step_number).collect();
        assert_eq!(numbers, vec![2]);
        assert_eq!(result.plan.steps[0].description, crate::plan::FALLBACK_STEP);
    }

    #[tokio::test]
    async fn replan_after_top_step_number_does_not_overflow() {
        let plan = r#"{"steps": [
            {"step_number": 4294967295, "description": "a"},
            {"step_number": 1, "description": "b"}
        ]}"#;
        let provider = Arc::new(SequentialMockProvider::with_results(vec![
            Ok(make_text_response(plan)),
            Ok(make_text_response("4")),
            Err(make_error()),
            Ok(make_text_response("garbage")),
            Ok(make_text_response("recovered")),
            Ok(make_text_response("Final")),
        ]));
        let result = agent(provider).run(PlanRequest::new("x")).await;

        assert_eq!(result.status, PlanStatus::Completed);
        let numbers: Vec<u32> = result.plan.steps.iter().map(|s| s.step_number).collect();
        assert_eq!(numbers, vec![1]);
        assert_eq!(result.plan.steps[0].result.as_deref(), Some("recovered"));
    }

    #[tokio::test]
    async fn planning_failure_is_reported() {
        let provider = Arc::new(SequentialMockProvider::with_results(vec![Err(make_error())]));
        let result = agent(provider).run(PlanRequest::new("x")).await;
        assert_eq!(result.status, PlanStatus::Failed);
        assert!(result.steps.is_empty());
    }

    #[tokio::test]
    async fn inconclusive_step_fails_and_replans() {
        let looping = make_text_response(&tool_call_text("calculator", json!({"expression": "1"})));
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_text_response(r#"{"steps": [{"description": "spin"}]}"#),
            looping.clone(),
            looping,
            make_text_response("no plan"),
            make_text_response("ok"),
            make_text_response("Final"),
        ]));
        let result = agent(provider)
            .with_step_max_iterations(2)
            .with_exhaustion_policy(ExhaustionPolicy::Inconclusive)
            .run(PlanRequest::new("x"))
            .await;

        assert_eq!(result.replans, 1);
        assert_eq!(result.status, PlanStatus::Completed);
        assert_eq!(result.steps[0].status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn stream_emits_phases() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_text_response(r#"{"goal": "g", "steps": [{"description": "only"}]}"#),
            make_text_response("done"),
            make_text_response("Final"),
        ]));
        let mut rx = agent(provider).run_stream(PlanRequest::new("x"));
        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            kinds.push(event.event_type());
        }
        assert_eq!(
            kinds,
            vec![
                "planning",
                "plan_created",
                "step_started",
                "step_completed",
                "synthesizing",
                "answer",
                "done"
            ]
        );
    }

    #[tokio::test]
    async fn stream_budget_exhaustion_ends_with_failed() {
        let provider = Arc::new(SequentialMockProvider::with_results(vec![
            Ok(make_text_response("x")),
            Err(make_error()),
        ]));
        let mut rx = agent(provider)
            .with_max_replans(0)
            .run_stream(PlanRequest::new("x"));
        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            kinds.push(event.event_type());
        }
        assert_eq!(kinds.last(), Some(&"done"));
        assert!(kinds.contains(&"failed"));
        assert!(!kinds.contains(&"synthesizing"));
    }
}
