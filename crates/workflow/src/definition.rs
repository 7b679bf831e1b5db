//! Declarative workflow definitions, loadable from TOML or JSON.
//!
//! ```toml
//! name = "greet"
//! inputs = ["user"]
//! outputs = ["greeting"]
//!
//! [[steps]]
//! name = "compose"
//! action = "set_variable"
//! params = { name = "greeting", value = "Hello {{user}}" }
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WorkflowError;

/// Default retry budget for `on_error = "retry"` steps.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// What happens when a step's action fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    /// Halt the run, status `Failed`
    #[default]
    Fail,
    /// Record the failure and move on
    Continue,
    /// Re-attempt up to `max_retries` more times, then fail the run
    Retry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub name: String,
    pub action: String,
    #[serde(default = "empty_params")]
    pub params: Value,
    /// Skip the step unless this resolves truthy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Falls back to the definition's `on_error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<OnError>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Seconds; falls back to the orchestrator default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Declared only; steps always run in list order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

fn empty_params() -> Value {
    Value::Object(serde_json::Map::new())
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl WorkflowStep {
    pub fn new(name: impl Into<String>, action: impl Into<String>, params: Value) -> Self {
        Self {
            name: name.into(),
            action: action.into(),
            params,
            condition: None,
            on_error: None,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: None,
            depends_on: Vec::new(),
        }
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_on_error(mut self, policy: OnError) -> Self {
        self.on_error = Some(policy);
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Some(secs);
        self
    }

    pub fn depends_on(mut self, step: impl Into<String>) -> Self {
        self.depends_on.push(step.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<WorkflowStep>,
    /// Payload keys the workflow expects
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Paths projected into the run output
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub on_error: OnError,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            steps: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            on_error: OnError::Fail,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn input(mut self, key: impl Into<String>) -> Self {
        self.inputs.push(key.into());
        self
    }

    pub fn output(mut self, path: impl Into<String>) -> Self {
        self.outputs.push(path.into());
        self
    }

    pub fn with_on_error(mut self, policy: OnError) -> Self {
        self.on_error = policy;
        self
    }

    /// Effective failure policy for `step`.
    pub fn policy_for(&self, step: &WorkflowStep) -> OnError {
        step.on_error.unwrap_or(self.on_error)
    }

    /// Structural checks. Action names are resolved at run time.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        let invalid = |msg: String| Err(WorkflowError::InvalidDefinition(msg));

        if self.name.trim().is_empty() {
            return invalid("workflow name is empty".into());
        }
        if self.steps.is_empty() {
            return invalid(format!("workflow '{}' has no steps", self.name));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.name.trim().is_empty() {
                return invalid(format!("workflow '{}' has a step with no name", self.name));
            }
            if step.action.trim().is_empty() {
                return invalid(format!("step '{}' has no action", step.name));
            }
            if !seen.insert(step.name.as_str()) {
                return invalid(format!("duplicate step name '{}'", step.name));
            }
            if step.timeout == Some(0) {
                return invalid(format!("step '{}' has a zero timeout", step.name));
            }
            if !step.params.is_object() {
                return invalid(format!("step '{}' params must be a table/object", step.name));
            }
        }

        for step in &self.steps {
            if let Some(missing) = step.depends_on.iter().find(|d| !seen.contains(d.as_str())) {
                return invalid(format!(
                    "step '{}' depends on unknown step '{missing}'",
                    step.name
                ));
            }
        }
        Ok(())
    }

    pub fn from_toml_str(text: &str) -> Result<Self, WorkflowError> {
        toml::from_str(text).map_err(|e| WorkflowError::Load {
            path: "<toml>".into(),
            reason: e.to_string(),
        })
    }

    pub fn from_json_str(text: &str) -> Result<Self, WorkflowError> {
        serde_json::from_str(text).map_err(|e| WorkflowError::Load {
            path: "<json>".into(),
            reason: e.to_string(),
        })
    }

    /// Load a `.json` or `.toml` file (anything else is read as TOML).
    pub fn from_file(path: &Path) -> Result<Self, WorkflowError> {
        let load_err = |reason: String| WorkflowError::Load {
            path: path.display().to_string(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| load_err(e.to_string()))?;

        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            serde_json::from_str(&text).map_err(|e| load_err(e.to_string()))
        } else {
            toml::from_str(&text).map_err(|e| load_err(e.to_string()))
        }
    }

    /// Load every `.toml` / `.json` definition in `dir`, sorted by file name.
    pub fn load_dir(dir: &Path) -> Result<Vec<Self>, WorkflowError> {
        let entries = std::fs::read_dir(dir).map_err(|e| WorkflowError::Load {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut paths: Vec<_> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| matches!(e, "toml" | "json"))
            })
            .collect();
        paths.sort();

        paths.iter().map(|p| Self::from_file(p)).collect()
    }
}
