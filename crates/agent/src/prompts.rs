//! Prompt text for the agent engines.

use std::collections::BTreeMap;

use taskloom_core::tool::{ToolOutcome, ToolRegistry};

use crate::parser::ToolRequest;
use crate::plan::{Plan, PlanStep};

const TOOL_CONTRACT: &str = "\
To use a tool, reply with a fenced block containing exactly one JSON request:

```tool_call
{\"tool\": \"<tool name>\", \"arguments\": {<arguments>}}
```

You may include several such blocks to call several tools; they run in order.
When you need no more tools, reply with the final answer only, with no tool_call block.";

/// System message for the ReAct loop.
pub fn agent_system(tools: &ToolRegistry, context: Option<&str>) -> String {
    let mut prompt = format!(
        "You are a capable assistant that solves tasks step by step, using tools when they help.\n\n\
         ## Available tools\n{}\n\n## How to call tools\n{TOOL_CONTRACT}",
        tools.render_catalog().trim_end()
    );
    if let Some(ctx) = context.filter(|c| !c.trim().is_empty()) {
        prompt.push_str("\n\n## Context\n");
        prompt.push_str(ctx.trim());
    }
    prompt
}

/// The instruction-plus-results message appended after a tool round.
pub fn tool_results(results: &[(ToolRequest, ToolOutcome)]) -> String {
    let mut out = String::from("Tool results:\n");
    for (request, outcome) in results {
        let status = if outcome.success { "ok" } else { "failed" };
        out.push_str(&format!(
            "- {} ({status}): {}\n",
            request.tool,
            outcome.output_text()
        ));
    }
    out.push_str(
        "\nContinue with the task. If you have enough information, reply with the final answer \
         and no tool call.",
    );
    out
}

pub fn planner_system(tools: &ToolRegistry) -> String {
    format!(
        "You are a planner. Break the user's task into a short sequence of concrete steps.\n\n\
         ## Available tools\n{}\n\n\
         Reply with JSON only, in this shape:\n\
         {{\"goal\": \"<one sentence goal>\", \"steps\": [\
         {{\"step_number\": 1, \"description\": \"...\", \"tools_needed\": [\"tool\"], \"depends_on\": []}}]}}",
        tools.render_catalog().trim_end()
    )
}

pub fn planner_task(task: &str) -> String {
    format!("Task: {task}")
}

pub fn replan_task(
    plan: &Plan,
    failed: &PlanStep,
    error: &str,
    completed: &BTreeMap<u32, String>,
) -> String {
    format!(
        "Task: {}\nGoal: {}\n\n## Completed steps\n{}\n\n## Failed step\n\
         Step {}: {}\nError: {error}\n\n\
         Produce a revised plan for the remaining work. Keep the step numbers of completed \
         steps if you include them; number new steps after them.",
        plan.task,
        plan.goal,
        render_results(completed),
        failed.step_number,
        failed.description,
    )
}

pub fn step_system(tools: &ToolRegistry) -> String {
    format!(
        "You are executing one step of a larger plan. Do only this step and report its result.\n\n\
         ## Available tools\n{}\n\n## How to call tools\n{TOOL_CONTRACT}",
        tools.render_catalog().trim_end()
    )
}

pub fn step_task(goal: &str, step: &PlanStep, completed: &BTreeMap<u32, String>) -> String {
    let mut out = format!(
        "Overall goal: {goal}\n\n## Previous results\n{}\n\n## Current step {}\n{}",
        render_results(completed),
        step.step_number,
        step.description
    );
    if !step.tools_needed.is_empty() {
        out.push_str(&format!("\nSuggested tools: {}", step.tools_needed.join(", ")));
    }
    out
}

pub fn synthesis_system() -> &'static str {
    "You combine the results of a multi-step plan into one clear, complete answer for the user."
}

pub fn synthesis_task(task: &str, goal: &str, completed: &BTreeMap<u32, String>) -> String {
    format!(
        "Task: {task}\nGoal: {goal}\n\n## Step results\n{}\n\nWrite the final answer.",
        render_results(completed)
    )
}

fn render_results(completed: &BTreeMap<u32, String>) -> String {
    if completed.is_empty() {
        return "(none yet)".into();
    }
    completed
        .iter()
        .map(|(n, r)| format!("Step {n}: {r}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_system_includes_catalog_and_context() {
        let tools = ToolRegistry::new();
        let prompt = agent_system(&tools, Some("User is in Berlin"));
        assert!(prompt.contains("(no tools available)"));
        assert!(prompt.contains("```tool_call"));
        assert!(prompt.contains("User is in Berlin"));
        assert!(!agent_system(&tools, Some("  ")).contains("## Context"));
    }

    #[test]
    fn results_rendering_is_ordered() {
        let mut done = BTreeMap::new();
        done.insert(2, "b".to_string());
        done.insert(1, "a".to_string());
        assert_eq!(render_results(&done), "Step 1: a\nStep 2: b");
        assert_eq!(render_results(&BTreeMap::new()), "(none yet)");
    }
}
