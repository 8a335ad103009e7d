//! Tool trait: the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act on a workspace:
//! list, read and search files, stage edits, apply patches.
//! The loop never calls a [`Tool`] directly; it goes through a
//! [`ToolDispatcher`], which adds the observation envelope, policy checks
//! and redaction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::ToolError;

/// Protocol version assumed when a call does not name one.
pub const DEFAULT_TOOL_VERSION: &str = "v1";

/// Per-call context handed to every tool.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Absolute workspace root the sandbox is confined to.
    pub workspace_root: PathBuf,
    /// Session owning any staged changes. `None` scopes to the workspace.
    pub session_id: Option<String>,
}

impl ToolContext {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        let id = session_id.into();
        self.session_id = if id.trim().is_empty() { None } else { Some(id) };
        self
    }
}

/// Name and version pair advertised to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub version: String,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// The result of a tool execution, before the dispatcher wraps it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolResult {
    /// Structured payload, serialized under `result`.
    pub result: Value,

    /// Top-level error code. Overrides whatever `result.error` says.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Extra top-level observation fields (e.g. `applied`, `available_paths`).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extras: Map<String, Value>,
}

impl ToolResult {
    /// Wrap any serializable payload.
    pub fn from_serialize<T: Serialize>(payload: &T) -> Result<Self, ToolError> {
        let result = serde_json::to_value(payload).map_err(|e| ToolError::ExecutionFailed {
            tool_name: "serialize".into(),
            reason: e.to_string(),
        })?;
        Ok(Self::from_value(result))
    }

    pub fn from_value(result: Value) -> Self {
        Self {
            result,
            error: None,
            extras: Map::new(),
        }
    }

    pub fn with_error(mut self, code: impl Into<String>) -> Self {
        self.error = Some(code.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extras.insert(key.into(), value);
        self
    }

    /// The effective error: top-level first, then `result.error`, then
    /// `result.success == false`.
    pub fn error_code(&self) -> Option<String> {
        if let Some(e) = self.error.as_deref().filter(|e| !e.trim().is_empty()) {
            return Some(e.to_string());
        }
        if let Some(e) = self.result.get("error").and_then(Value::as_str)
            && !e.trim().is_empty()
        {
            return Some(e.to_string());
        }
        if self.result.get("success").and_then(Value::as_bool) == Some(false) {
            return Some("tool_failed".into());
        }
        None
    }
}

/// The core Tool trait.
///
/// Each tool (READ_FILE, EDIT_FILE, APPLY_PATCH, ...) implements this trait
/// and is registered in the [`ToolRegistry`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// Canonical upper-case name (e.g., "READ_FILE").
    fn name(&self) -> &str;

    /// Protocol version of the argument/result schema.
    fn version(&self) -> &str {
        DEFAULT_TOOL_VERSION
    }

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            version: self.version().to_string(),
        }
    }
}

/// Map a model-supplied tool name onto its canonical form.
///
/// Accepts the short aliases models tend to invent plus snake_case or
/// lower-case spellings of every canonical name.
pub fn canonical_tool_name(raw: &str) -> String {
    let trimmed = raw.trim();
    let lower = trimmed.to_lowercase();
    let mapped = match lower.as_str() {
        "read" => "READ_FILE",
        "edit" => "EDIT_FILE",
        "write" => "WRITE_FILE",
        "apply_patch" | "applypatch" | "patch" => "APPLY_PATCH",
        "ls" | "list" | "glob" => "LIST_FILES",
        "grep" => "GREP",
        "search" | "codesearch" => "SEARCH_KNOWLEDGE",
        "bash" | "shell" => "RUN_COMMAND",
        "batch" => "BATCH_REPLACE",
        "multiedit" => "REPLACE_LINES",
        "view" | "open" => "OPEN_FILE_VIEW",
        "move" | "mv" | "rename" => "MOVE_PATH",
        "mkdir" => "CREATE_DIRECTORY",
        "undo" => "UNDO_EDIT",
        _ => return trimmed.to_uppercase(),
    };
    mapped.to_string()
}

/// A registry of available tools keyed by canonical name.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = canonical_tool_name(tool.name());
        self.tools.insert(name, tool);
    }

    /// Get a tool by name or alias.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(&canonical_tool_name(name)).map(|t| t.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Name/version pairs, sorted by name for a stable prompt.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|t| t.spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The loop's view of tool execution.
///
/// Implementations never fail: every outcome, including unknown tools and
/// policy denials, comes back as an observation JSON string.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    async fn execute(
        &self,
        tool: &str,
        version: Option<&str>,
        args: &Value,
        ctx: &ToolContext,
    ) -> String;

    fn list_tool_specs(&self) -> Vec<ToolSpec>;

    fn is_run_command_enabled(&self) -> bool;
}
