//! File read tool: read file contents confined to allowed roots.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use taskloom_core::error::ToolError;
use taskloom_core::tool::{Tool, ToolParameter};

/// Reads UTF-8 files that resolve inside one of `allowed_roots`.
pub struct FileReadTool {
    allowed_roots: Vec<PathBuf>,
    max_bytes: u64,
}

impl FileReadTool {
    /// Roots that do not exist are dropped. An empty list falls back to
    /// the current working directory.
    pub fn new(allowed_roots: Vec<PathBuf>) -> Self {
        let mut roots: Vec<PathBuf> = allowed_roots
            .iter()
            .filter_map(|r| r.canonicalize().ok())
            .collect();
        if roots.is_empty() {
            if let Ok(cwd) = std::env::current_dir().and_then(|d| d.canonicalize()) {
                roots.push(cwd);
            }
        }
        Self {
            allowed_roots: roots,
            max_bytes: 1024 * 1024,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    fn denied(reason: impl Into<String>) -> ToolError {
        ToolError::PermissionDenied {
            tool_name: "file_read".into(),
            reason: reason.into(),
        }
    }

    /// Resolve symlinks and `..`, then check the result is under a root.
    fn resolve(&self, path: &str) -> Result<PathBuf, ToolError> {
        let input = Path::new(path);
        let candidate = if input.is_absolute() {
            input.to_path_buf()
        } else {
            // Relative paths are taken against the first root
            match self.allowed_roots.first() {
                Some(root) => root.join(input),
                None => return Err(Self::denied("no allowed roots configured")),
            }
        };

        let canonical = candidate.canonicalize().map_err(|e| ToolError::ExecutionFailed {
            tool_name: "file_read".into(),
            reason: format!("Failed to resolve '{path}': {e}"),
        })?;

        if self.allowed_roots.iter().any(|root| canonical.starts_with(root)) {
            Ok(canonical)
        } else {
            Err(Self::denied(format!("'{path}' is outside allowed roots")))
        }
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read the contents of a text file at the given path."
    }

    fn category(&self) -> &str {
        "filesystem"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::required("path", "string", "The file path to read")]
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let path = arguments["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;

        let resolved = self.resolve(path)?;

        let metadata = tokio::fs::metadata(&resolved)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "file_read".into(),
                reason: e.to_string(),
            })?;
        if metadata.len() > self.max_bytes {
            return Err(ToolError::ExecutionFailed {
                tool_name: "file_read".into(),
                reason: format!("file is {} bytes, limit is {}", metadata.len(), self.max_bytes),
            });
        }

        let content = tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "file_read".into(),
                reason: format!("Failed to read file: {e}"),
            })?;

        Ok(Value::String(content))
    }
}
