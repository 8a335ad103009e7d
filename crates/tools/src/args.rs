//! Argument extraction shared by the tool wrappers.
//!
//! Models spell argument names inconsistently (`startLine`, `start_line`),
//! so every accessor takes a list of accepted keys.

use codeagent_core::{Field, ToolError};
use serde_json::Value;

pub(crate) fn str_arg<'a>(args: &'a Value, keys: &[&str]) -> Option<&'a str> {
    Field::first_of(args, keys).as_str()
}

pub(crate) fn int_arg(args: &Value, keys: &[&str]) -> Option<i64> {
    Field::first_of(args, keys).as_i64()
}

pub(crate) fn bool_arg(args: &Value, keys: &[&str]) -> bool {
    Field::first_of(args, keys).as_bool().unwrap_or(false)
}

pub(crate) fn dry_run(args: &Value) -> bool {
    bool_arg(args, &["dryRun", "dry_run"])
}

/// A non-blank string argument, or `code` as an argument error.
pub(crate) fn required_str<'a>(args: &'a Value, keys: &[&str], code: &str) -> Result<&'a str, ToolError> {
    Field::first_of(args, keys)
        .non_empty_str()
        .ok_or_else(|| ToolError::InvalidArguments(code.into()))
}

/// A string argument that must be present but may be empty.
pub(crate) fn present_str<'a>(args: &'a Value, keys: &[&str], code: &str) -> Result<&'a str, ToolError> {
    str_arg(args, keys).ok_or_else(|| ToolError::InvalidArguments(code.into()))
}

/// A list of strings given either as an array or as one comma-separated string.
pub(crate) fn str_list(args: &Value, keys: &[&str]) -> Vec<String> {
    match Field::first_of(args, keys).value() {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    }
}

/// Run a synchronous sandbox operation on the blocking pool.
pub(crate) async fn run_blocking<T, F>(tool: &str, f: F) -> Result<T, ToolError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ToolError::ExecutionFailed {
            tool_name: tool.to_string(),
            reason: e.to_string(),
        })
}
