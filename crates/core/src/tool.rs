//! Tool trait and registry: the abstraction over invocable capabilities.
//!
//! Tools are what give the engines the ability to act: evaluate an
//! expression, call an HTTP endpoint, read a file, search a corpus.
//!
//! The [`ToolRegistry`] is built once at composition time and shared
//! read-only (behind an `Arc`) by every engine. Its `execute` never fails:
//! unknown names, handler errors and handler panics all come back as a
//! failed [`ToolOutcome`].

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ToolError;

/// One declared parameter of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    /// JSON type name ("string", "number", "object", ...)
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

impl ToolParameter {
    pub fn required(
        name: impl Into<String>,
        kind: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            description: description.into(),
            required: true,
        }
    }

    pub fn optional(
        name: impl Into<String>,
        kind: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }
}

/// A tool definition in JSON-schema form, for clients that want one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the tool's parameters
    pub parameters: Value,
}

/// The core Tool trait.
///
/// Handlers receive the raw arguments object. There is no central schema
/// validation; a handler reports bad arguments as [`ToolError::InvalidArguments`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "calculator").
    fn name(&self) -> &str;

    /// A description of what this tool does (shown to the model).
    fn description(&self) -> &str;

    /// Catalog group this tool is listed under.
    fn category(&self) -> &str {
        "general"
    }

    /// Ordered parameter list.
    fn parameters(&self) -> Vec<ToolParameter>;

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: Value) -> std::result::Result<Value, ToolError>;

    /// JSON Schema derived from [`Tool::parameters`].
    fn parameters_schema(&self) -> Value {
        let params = self.parameters();
        let mut properties = serde_json::Map::new();
        for p in &params {
            properties.insert(
                p.name.clone(),
                serde_json::json!({ "type": p.kind, "description": p.description }),
            );
        }
        let required: Vec<&str> = params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A read-only description of a registered tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub category: String,
    pub parameters: Vec<ToolParameter>,
}

/// The structured result of [`ToolRegistry::execute`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ToolOutcome {
    fn ok(result: Value, duration_ms: u64) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            duration_ms,
        }
    }

    fn failed(error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
            duration_ms,
        }
    }

    /// Text rendering used when feeding results back to the model.
    pub fn output_text(&self) -> String {
        match (&self.result, &self.error) {
            (_, Some(err)) if !self.success => format!("Error: {err}"),
            (Some(Value::String(s)), _) => s.clone(),
            (Some(v), _) => v.to_string(),
            (None, _) => String::new(),
        }
    }
}

/// An executed tool call, attached to an agent step. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub arguments: Value,
    pub outcome: ToolOutcome,
    pub timestamp: DateTime<Utc>,
}

/// A registry of available tools.
///
/// Keeps insertion order for listing; re-registering a name replaces the
/// handler in place (last registration wins, position is kept).
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        match self.index.get(&name) {
            Some(&slot) => {
                debug!(tool = %name, "Replacing registered tool");
                self.tools[slot] = tool;
            }
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.index.get(name).map(|&i| self.tools[i].as_ref())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool by name. Never returns an error; failures are data.
    pub async fn execute(&self, name: &str, arguments: Value) -> ToolOutcome {
        let start = Instant::now();
        let Some(tool) = self.get(name) else {
            warn!(tool = %name, "Unknown tool requested");
            return ToolOutcome::failed(ToolError::NotFound(name.to_string()).to_string(), 0);
        };

        let result = AssertUnwindSafe(tool.execute(arguments)).catch_unwind().await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(value)) => {
                debug!(tool = %name, duration_ms, "Tool executed");
                ToolOutcome::ok(value, duration_ms)
            }
            Ok(Err(e)) => {
                warn!(tool = %name, error = %e, "Tool execution failed");
                ToolOutcome::failed(e.to_string(), duration_ms)
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                warn!(tool = %name, reason = %reason, "Tool panicked");
                ToolOutcome::failed(ToolError::Panicked(reason).to_string(), duration_ms)
            }
        }
    }

    /// Registered tools in insertion order.
    pub fn list(&self) -> Vec<ToolInfo> {
        self.tools
            .iter()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
                category: t.category().to_string(),
                parameters: t.parameters(),
            })
            .collect()
    }

    /// Tools grouped by category; groups ordered by first appearance.
    pub fn by_category(&self) -> Vec<(String, Vec<ToolInfo>)> {
        let mut groups: Vec<(String, Vec<ToolInfo>)> = Vec::new();
        for info in self.list() {
            match groups.iter_mut().find(|(c, _)| *c == info.category) {
                Some((_, members)) => members.push(info),
                None => groups.push((info.category.clone(), vec![info])),
            }
        }
        groups
    }

    /// All tool definitions in JSON-schema form.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.to_definition()).collect()
    }

    /// List all registered tool names, in order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Render the model-facing catalog.
    pub fn render_catalog(&self) -> String {
        if self.tools.is_empty() {
            return "(no tools available)".into();
        }
        let mut out = String::new();
        for (category, tools) in self.by_category() {
            out.push_str(&format!("### {category}\n"));
            for tool in tools {
                out.push_str(&format!("- {}: {}\n", tool.name, tool.description));
                for p in &tool.parameters {
                    let req = if p.required { "required" } else { "optional" };
                    out.push_str(&format!(
                        "    - {} ({}, {}): {}\n",
                        p.name, p.kind, req, p.description
                    ));
                }
            }
        }
        out
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn category(&self) -> &str {
            "text"
        }
        fn parameters(&self) -> Vec<ToolParameter> {
            vec![ToolParameter::required("text", "string", "Text to echo")]
        }
        async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
            let text = arguments["text"]
                .as_str()
                .ok_or_else(|| ToolError::InvalidArguments("Missing 'text' argument".into()))?;
            Ok(Value::String(text.to_string()))
        }
    }

    struct ShoutTool(&'static str);

    #[async_trait]
    impl Tool for ShoutTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            self.0
        }
        fn parameters(&self) -> Vec<ToolParameter> {
            vec![]
        }
        async fn execute(&self, _arguments: Value) -> Result<Value, ToolError> {
            Ok(Value::String("LOUD".into()))
        }
    }

    struct PanicTool;

    #[async_trait]
    impl Tool for PanicTool {
        fn name(&self) -> &str {
            "boom"
        }
        fn description(&self) -> &str {
            "Always panics"
        }
        fn parameters(&self) -> Vec<ToolParameter> {
            vec![]
        }
        async fn execute(&self, _arguments: Value) -> Result<Value, ToolError> {
            panic!("handler blew up");
        }
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn last_registration_wins_and_keeps_position() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        registry.register(Box::new(PanicTool));
        registry.register(Box::new(ShoutTool("replacement")));
        assert_eq!(registry.names(), vec!["echo", "boom"]);
        assert_eq!(registry.get("echo").unwrap().description(), "replacement");
    }

    #[test]
    fn schema_lists_required_parameters() {
        let def = EchoTool.to_definition();
        assert_eq!(def.parameters["required"], serde_json::json!(["text"]));
        assert_eq!(def.parameters["properties"]["text"]["type"], "string");
    }

    #[test]
    fn grouping_by_category() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        registry.register(Box::new(PanicTool));
        let groups = registry.by_category();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "text");
        assert_eq!(groups[1].0, "general");
    }

    #[test]
    fn catalog_mentions_parameters() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        let catalog = registry.render_catalog();
        assert!(catalog.contains("- echo: Echoes back the input"));
        assert!(catalog.contains("text (string, required)"));
    }

    #[tokio::test]
    async fn registry_execute_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        let outcome = registry
            .execute("echo", serde_json::json!({"text": "hello world"}))
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.output_text(), "hello world");
    }

    #[tokio::test]
    async fn unknown_tool_is_a_structured_failure() {
        let registry = ToolRegistry::new();
        let outcome = registry.execute("nonexistent", serde_json::json!({})).await;
        assert!(!outcome.success);
        assert!(!outcome.error.as_deref().unwrap_or("").is_empty());
    }

    #[tokio::test]
    async fn handler_error_is_a_structured_failure() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        let outcome = registry.execute("echo", serde_json::json!({})).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("text"));
    }

    #[tokio::test]
    async fn handler_panic_is_caught() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(PanicTool));
        let outcome = registry.execute("boom", serde_json::json!({})).await;
        assert!(!outcome.success);
        assert!(outcome.error.as_ref().unwrap().contains("handler blew up"));
        assert!(outcome.output_text().starts_with("Error:"));
    }
}
