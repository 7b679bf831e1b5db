//! `{{ path }}` placeholder resolution.
//!
//! A dotted path resolves against step outputs, then run variables, then
//! the payload. The prefixes `steps.`, `vars.`/`variables.` and
//! `input.`/`payload.` pin the lookup to one source. Numeric segments index
//! into arrays. Unresolvable placeholders stay in the text untouched.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("placeholder pattern is valid")
});

/// The data a placeholder can see.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub steps: &'a Map<String, Value>,
    pub variables: &'a Map<String, Value>,
    pub payload: &'a Value,
}

impl<'a> Scope<'a> {
    pub fn lookup(&self, path: &str) -> Option<&'a Value> {
        let path = path.trim();
        if path.is_empty() {
            return None;
        }

        if let Some((head, rest)) = path.split_once('.') {
            let pinned = match head {
                "steps" => walk_map(self.steps, rest),
                "vars" | "variables" => walk_map(self.variables, rest),
                "input" | "payload" => walk(self.payload, rest),
                _ => None,
            };
            if pinned.is_some() {
                return pinned;
            }
        }

        walk_map(self.steps, path)
            .or_else(|| walk_map(self.variables, path))
            .or_else(|| walk(self.payload, path))
    }
}

fn walk_map<'v>(map: &'v Map<String, Value>, path: &str) -> Option<&'v Value> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let value = map.get(head)?;
    match rest {
        Some(rest) => walk(value, rest),
        None => Some(value),
    }
}

fn walk<'v>(mut value: &'v Value, path: &str) -> Option<&'v Value> {
    for segment in path.split('.') {
        value = match value {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(value)
}

/// The string form substituted for a placeholder.
pub fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Replace every resolvable placeholder in `text`.
pub fn resolve_str(text: &str, scope: &Scope<'_>) -> String {
    if !text.contains("{{") {
        return text.to_string();
    }
    PLACEHOLDER
        .replace_all(text, |caps: &Captures<'_>| match scope.lookup(&caps[1]) {
            Some(value) => display(value),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Resolve placeholders in every string inside `value`.
///
/// A string that is exactly one placeholder naming an array or object
/// becomes that structured value; everything else is substituted as text.
pub fn resolve_value(value: &Value, scope: &Scope<'_>) -> Value {
    match value {
        Value::String(s) => {
            if let Some(structured) = whole_placeholder(s, scope) {
                return structured;
            }
            Value::String(resolve_str(s, scope))
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_value(v, scope)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, scope)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn whole_placeholder(text: &str, scope: &Scope<'_>) -> Option<Value> {
    let caps = PLACEHOLDER.captures(text.trim())?;
    if caps[0].len() != text.trim().len() {
        return None;
    }
    scope
        .lookup(&caps[1])
        .filter(|v| v.is_array() || v.is_object())
        .cloned()
}
