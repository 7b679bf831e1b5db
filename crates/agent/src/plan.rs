//! Plan model and planner-output parsing.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const FALLBACK_STEP: &str = "Complete the task";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    InProgress,
    Replanned,
    Completed,
    Failed,
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Replanned => "replanned",
            Self::Completed => "completed",
            Self::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub step_number: u32,
    pub description: String,
    #[serde(default)]
    pub tools_needed: Vec<String>,
    /// Declared only; steps always run in list order
    #[serde(default)]
    pub depends_on: Vec<u32>,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl PlanStep {
    pub fn new(step_number: u32, description: impl Into<String>) -> Self {
        Self {
            step_number,
            description: description.into(),
            tools_needed: Vec::new(),
            depends_on: Vec::new(),
            status: StepStatus::Pending,
            result: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub(crate) fn start(&mut self) {
        self.status = StepStatus::InProgress;
        self.started_at = Some(Utc::now());
    }

    pub(crate) fn complete(&mut self, result: String) {
        self.status = StepStatus::Completed;
        self.result = Some(result);
        self.finished_at = Some(Utc::now());
    }

    pub(crate) fn fail(&mut self, error: String) {
        self.status = StepStatus::Failed;
        self.error = Some(error);
        self.finished_at = Some(Utc::now());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub task: String,
    pub goal: String,
    pub steps: Vec<PlanStep>,
    /// Bumped on every replan
    pub revision: u32,
    pub status: PlanStatus,
}

impl Plan {
    /// Single catch-all step, used when planner output is unusable.
    pub fn fallback(task: &str, step_number: u32) -> Self {
        Self {
            task: task.to_string(),
            goal: task.to_string(),
            steps: vec![PlanStep::new(step_number, FALLBACK_STEP)],
            revision: 0,
            status: PlanStatus::Pending,
        }
    }

    /// Parse planner output, falling back to a single step.
    ///
    /// `first_number` numbers the fallback step and any unnumbered steps.
    pub fn from_planner_output(task: &str, output: &str, first_number: u32) -> Self {
        match parse_plan(output, first_number) {
            Some((goal, steps)) => Self {
                task: task.to_string(),
                goal: goal.unwrap_or_else(|| task.to_string()),
                steps,
                revision: 0,
                status: PlanStatus::Pending,
            },
            None => {
                debug!("Planner output unparsable, using single-step plan");
                Self::fallback(task, first_number)
            }
        }
    }

    /// Mark steps whose number already has a result as completed.
    pub(crate) fn reseed(&mut self, completed: &BTreeMap<u32, String>) {
        for step in &mut self.steps {
            if let Some(result) = completed.get(&step.step_number) {
                step.status = StepStatus::Completed;
                step.result = Some(result.clone());
            }
        }
    }
}

#[derive(Deserialize)]
struct RawPlan {
    #[serde(default)]
    goal: Option<String>,
    #[serde(default)]
    steps: Vec<RawStep>,
}

#[derive(Deserialize)]
struct RawStep {
    #[serde(default, alias = "number", alias = "step")]
    step_number: Option<u32>,
    #[serde(alias = "task", alias = "action")]
    description: String,
    #[serde(default, alias = "tools")]
    tools_needed: Vec<String>,
    #[serde(default, alias = "dependencies")]
    depends_on: Vec<u32>,
}

/// Accepts `{goal, steps: [...]}` or a bare `[...]` of steps, optionally
/// wrapped in prose or a fenced block.
fn parse_plan(output: &str, first_number: u32) -> Option<(Option<String>, Vec<PlanStep>)> {
    let trimmed = output.trim();

    let raw = slice_between(trimmed, '{', '}')
        .and_then(|s| serde_json::from_str::<RawPlan>(s).ok())
        .filter(|p| !p.steps.is_empty())
        .or_else(|| {
            slice_between(trimmed, '[', ']')
                .and_then(|s| serde_json::from_str::<Vec<RawStep>>(s).ok())
                .map(|steps| RawPlan { goal: None, steps })
        })?;

    let mut next = first_number;
    let mut used = BTreeSet::new();
    let mut steps = Vec::with_capacity(raw.steps.len());
    for raw_step in raw.steps {
        let description = raw_step.description.trim().to_string();
        if description.is_empty() {
            continue;
        }
        // Numbers stay unique within a plan, even when the model repeats
        // one or numbers a step at the top of the range.
        let mut number = raw_step.step_number.unwrap_or(next);
        if used.contains(&number) {
            number = first_unused(next, |n| used.contains(&n));
        }
        used.insert(number);
        next = number.max(next).saturating_add(1);

        let mut step = PlanStep::new(number, description);
        step.tools_needed = raw_step.tools_needed;
        step.depends_on = raw_step.depends_on;
        steps.push(step);
    }

    if steps.is_empty() {
        return None;
    }
    let goal = raw.goal.filter(|g| !g.trim().is_empty());
    Some((goal, steps))
}

/// Smallest number not in `used`, searching upward from `start` and then
/// wrapping to 1.
pub(crate) fn first_unused(start: u32, taken: impl Fn(u32) -> bool) -> u32 {
    (start.max(1)..=u32::MAX)
        .chain(1..start)
        .find(|&n| !taken(n))
        .unwrap_or(start)
}

fn slice_between(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_object_plan() {
        let output = r#"Here is the plan:
```json
{"goal": "Find the weather", "steps": [
  {"step_number": 1, "description": "Search forecast", "tools_needed": ["search"]},
  {"step_number": 2, "description": "Summarize", "depends_on": [1]}
]}
```"#;
        let plan = Plan::from_planner_output("weather?", output, 1);
        assert_eq!(plan.goal, "Find the weather");
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].tools_needed, vec!["search"]);
        assert_eq!(plan.steps[1].depends_on, vec![1]);
        assert!(plan.steps.iter().all(|s| s.status == StepStatus::Pending));
    }

    #[test]
    fn parses_bare_array_with_aliases() {
        let output = r#"[{"number": 1, "task": "a"}, {"description": "b"}]"#;
        let plan = Plan::from_planner_output("t", output, 1);
        assert_eq!(plan.goal, "t");
        let numbers: Vec<u32> = plan.steps.iter().map(|s| s.step_number).collect();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[test]
    fn unparsable_output_falls_back_to_one_step() {
        let plan = Plan::from_planner_output("do it", "I cannot plan this, sorry.", 1);
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].description, FALLBACK_STEP);
        assert_eq!(plan.steps[0].step_number, 1);
        assert!(plan.steps[0].tools_needed.is_empty());
    }

    #[test]
    fn empty_step_list_falls_back() {
        let plan = Plan::from_planner_output("x", r#"{"goal": "g", "steps": []}"#, 4);
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].step_number, 4);
    }

    #[test]
    fn unnumbered_steps_continue_after_first_number() {
        let plan = Plan::from_planner_output(
            "x",
            r#"{"steps": [{"description": "a"}, {"description": "b"}]}"#,
            3,
        );
        let numbers: Vec<u32> = plan.steps.iter().map(|s| s.step_number).collect();
        assert_eq!(numbers, vec![3, 4]);
    }

    #[test]
    fn reseed_marks_completed_numbers() {
        let mut plan = Plan::from_planner_output(
            "x",
            r#"{"steps": [{"step_number": 1, "description": "a"}, {"step_number": 2, "description": "b"}]}"#,
            1,
        );
        let mut done = BTreeMap::new();
        done.insert(1, "first result".to_string());
        plan.reseed(&done);
        assert_eq!(plan.steps[0].status, StepStatus::Completed);
        assert_eq!(plan.steps[0].result.as_deref(), Some("first result"));
        assert_eq!(plan.steps[1].status, StepStatus::Pending);
    }

    #[test]
    fn step_number_at_u32_max_does_not_overflow() {
        let plan = Plan::from_planner_output(
            "t",
            r#"{"steps":[{"step_number":4294967295,"description":"a"},{"description":"b"}]}"#,
            1,
        );
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].step_number, u32::MAX);
        assert_ne!(plan.steps[1].step_number, u32::MAX);
    }

    #[test]
    fn duplicate_step_numbers_are_renumbered() {
        let plan = Plan::from_planner_output(
            "t",
            r#"[{"step_number": 2, "description": "a"}, {"step_number": 2, "description": "b"}, {"description": "c"}]"#,
            1,
        );
        let numbers: Vec<u32> = plan.steps.iter().map(|s| s.step_number).collect();
        assert_eq!(numbers, vec![2, 3, 4]);
    }

    #[test]
    fn first_unused_wraps_past_the_top() {
        assert_eq!(first_unused(u32::MAX, |n| n == u32::MAX), 1);
        assert_eq!(first_unused(3, |n| n == 3 || n == 4), 5);
        assert_eq!(first_unused(0, |_| false), 1);
    }
}
