//! Tool-call extraction from free-form model output.
//!
//! A response may carry zero, one, or many tool requests. A request is a
//! JSON object naming a tool and (optionally) its arguments:
//!
//! ```text
//! {"tool": "calculator", "arguments": {"expression": "2+2"}}
//! ```
//!
//! `name` is accepted in place of `tool` when an arguments key is present,
//! and `args` / `parameters` in place of `arguments`. Requests appear either
//! as the whole body of a fenced block (tagged `tool_call`, `tool`, `json`,
//! or untagged) or inline, as a balanced `{...}` object anywhere outside
//! fenced blocks. Results come back in textual order; fragments that do not
//! parse as a request are ignored.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

static FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[ \t]*([A-Za-z0-9_-]*)[^\n]*\n(.*?)```").expect("fence pattern is valid")
});

const REQUEST_TAGS: &[&str] = &["tool_call", "tool", "json", ""];
const ARGUMENT_KEYS: &[&str] = &["arguments", "args", "parameters"];

/// One tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub tool: String,
    pub arguments: Value,
}

/// Extract every tool request from `text`, in the order they appear.
pub fn parse_tool_calls(text: &str) -> Vec<ToolRequest> {
    let mut found: Vec<(usize, ToolRequest)> = Vec::new();
    let mut fenced: Vec<(usize, usize)> = Vec::new();

    for caps in FENCE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        fenced.push((whole.start(), whole.end()));

        let tag = caps.get(1).map_or("", |m| m.as_str()).to_ascii_lowercase();
        if !REQUEST_TAGS.contains(&tag.as_str()) {
            continue;
        }
        let body = caps.get(2).map_or("", |m| m.as_str()).trim();
        if let Some(request) = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| request_from_value(&v))
        {
            found.push((whole.start(), request));
        }
    }

    let mut segment_start = 0;
    for &(start, end) in &fenced {
        scan_inline(text, segment_start, start, &mut found);
        segment_start = end;
    }
    scan_inline(text, segment_start, text.len(), &mut found);

    found.sort_by_key(|(pos, _)| *pos);
    found.into_iter().map(|(_, r)| r).collect()
}

/// Look for balanced objects in `text[from..to]`.
fn scan_inline(text: &str, from: usize, to: usize, found: &mut Vec<(usize, ToolRequest)>) {
    let bytes = text.as_bytes();
    let mut i = from;
    while i < to {
        if bytes[i] != b'{' {
            i += 1;
            continue;
        }
        match balanced_end(bytes, i, to) {
            Some(end) => {
                let candidate = &text[i..end];
                match serde_json::from_str::<Value>(candidate)
                    .ok()
                    .and_then(|v| request_from_value(&v))
                {
                    Some(request) => {
                        found.push((i, request));
                        i = end;
                    }
                    // Not a request; an inner object still might be
                    None => i += 1,
                }
            }
            None => i += 1,
        }
    }
}

/// Index one past the `}` closing the object opened at `start`.
fn balanced_end(bytes: &[u8], start: usize, limit: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..limit].iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn request_from_value(value: &Value) -> Option<ToolRequest> {
    let obj = value.as_object()?;

    let arguments_key = ARGUMENT_KEYS.iter().find(|k| obj.contains_key(**k));

    let tool = match obj.get("tool").and_then(Value::as_str) {
        Some(t) => t,
        // `name` alone is too common in ordinary JSON answers
        None if arguments_key.is_some() => obj.get("name").and_then(Value::as_str)?,
        None => return None,
    };
    let tool = tool.trim();
    if tool.is_empty() {
        return None;
    }

    let arguments = match arguments_key.and_then(|k| obj.get(*k)) {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(Value::Object(map)) => Value::Object(map.clone()),
        // Some models double-encode arguments as a JSON string
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s).ok()? {
            Value::Object(map) => Value::Object(map),
            _ => return None,
        },
        Some(_) => return None,
    };

    Some(ToolRequest {
        tool: tool.to_string(),
        arguments,
    })
}
