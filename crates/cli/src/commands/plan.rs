//! `taskloom plan`: Plan a task, execute the steps, synthesize an answer.

use taskloom_agent::{PlanExecuteAgent, PlanRequest, PlanResult, PlanStatus, PlanStreamEvent, StepStatus};

use super::runtime::{self, CliResult};

pub async fn run(
    task: String,
    model: Option<String>,
    max_replans: Option<u32>,
    stream: bool,
) -> CliResult<()> {
    let config = runtime::load_config()?;
    let provider = runtime::require_provider(&config)?;
    let tools = runtime::tool_registry(&config)?;

    let agent = PlanExecuteAgent::new(provider, &config.default_model, tools)
        .with_temperature(config.default_temperature)
        .with_max_tokens(config.default_max_tokens)
        .with_max_replans(config.planner.max_replans)
        .with_step_max_iterations(config.planner.step_max_iterations)
        .with_exhaustion_policy(config.agent.on_exhaustion);

    let mut request = PlanRequest::new(task);
    if let Some(model) = model {
        request = request.with_model(model);
    }
    if let Some(max) = max_replans {
        request = request.with_max_replans(max);
    }

    if stream {
        let mut events = agent.run_stream(request);
        let mut failed = false;
        while let Some(event) = events.recv().await {
            if let PlanStreamEvent::Done { status, .. } = &event {
                failed = *status == PlanStatus::Failed;
            }
            println!("{}", render_event(&event));
        }
        if failed {
            return Err("Plan run failed".into());
        }
        return Ok(());
    }

    let result = agent.run(request).await;
    print_result(&result);
    match result.status {
        PlanStatus::Failed => Err(result.error.unwrap_or_else(|| "Plan run failed".into()).into()),
        _ => Ok(()),
    }
}

fn print_result(result: &PlanResult) {
    println!("🎯 Goal: {}", result.goal);
    for step in &result.steps {
        let mark = match step.status {
            StepStatus::Completed => "✅",
            StepStatus::Failed => "❌",
            StepStatus::InProgress => "⏳",
            StepStatus::Pending => "·",
        };
        println!("   {mark} {}. {}", step.step_number, step.description);
        if let Some(error) = &step.error {
            println!("        {error}");
        }
    }
    println!();
    if let Some(answer) = &result.final_result {
        println!("{answer}");
        println!();
    }
    println!(
        "{} with {} replan(s), {} tokens, {} ms",
        result.status, result.replans, result.total_tokens, result.latency_ms
    );
    if let Some(error) = &result.error {
        println!("   Error: {error}");
    }
}

fn render_event(event: &PlanStreamEvent) -> String {
    match event {
        PlanStreamEvent::Planning { task } => format!("🗺️  Planning: {task}"),
        PlanStreamEvent::PlanCreated {
            goal,
            revision,
            steps,
        } => {
            let mut out = format!("📋 Plan r{revision}: {goal}");
            for step in steps {
                let done = if step.status == StepStatus::Completed {
                    " (done)"
                } else {
                    ""
                };
                out.push_str(&format!("\n   {}. {}{done}", step.step_number, step.description));
            }
            out
        }
        PlanStreamEvent::StepStarted {
            step_number,
            description,
        } => format!("▶  Step {step_number}: {description}"),
        PlanStreamEvent::StepCompleted {
            step_number,
            result,
        } => format!("✅ Step {step_number}: {result}"),
        PlanStreamEvent::StepFailed { step_number, error } => {
            format!("❌ Step {step_number}: {error}")
        }
        PlanStreamEvent::Replanning {
            revision,
            failed_step,
            error,
        } => format!("🔁 Replanning (r{revision}) after step {failed_step}: {error}"),
        PlanStreamEvent::Synthesizing => "🧩 Synthesizing...".to_string(),
        PlanStreamEvent::Answer { content } => format!("\n{content}\n"),
        PlanStreamEvent::Failed { error } => format!("❌ {error}"),
        PlanStreamEvent::Done { status, replans } => {
            format!("{status} with {replans} replan(s)")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_replanning() {
        let line = render_event(&PlanStreamEvent::Replanning {
            revision: 1,
            failed_step: 2,
            error: "boom".into(),
        });
        assert!(line.contains("r1"));
        assert!(line.contains("step 2"));
        assert!(line.contains("boom"));
    }

    #[test]
    fn renders_done() {
        let line = render_event(&PlanStreamEvent::Done {
            status: PlanStatus::Completed,
            replans: 0,
        });
        assert_eq!(line, "completed with 0 replan(s)");
    }
}
