//! The tool dispatcher used by the loop.
//!
//! [`ToolExecutor`] resolves aliases, applies the allow/deny policy and the
//! argument size limit, runs the tool, and wraps whatever came back in the
//! observation envelope:
//!
//! ```json
//! {"tool":"READ_FILE","version":"v1","status":"ok","tookMs":3,
//!  "args":{...},"result":{...},"error":null,"hint":null}
//! ```
//!
//! The serialized envelope is masked for credentials before it is returned.

use async_trait::async_trait;
use chrono::Utc;
use codeagent_core::tool::{DEFAULT_TOOL_VERSION, ToolDispatcher, ToolRegistry, ToolResult, ToolSpec, canonical_tool_name};
use codeagent_core::{DomainEvent, EventBus, ToolContext};
use codeagent_security::{AuditEvent, AuditLogger, AuditOutcome, ToolCheckResult, ToolPolicy, redact_sensitive};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

const RUN_COMMAND: &str = "RUN_COMMAND";

/// Argument limits for tools whose payload is a block of code.
fn args_floor(tool: &str) -> usize {
    match tool {
        "EDIT_FILE" | "REPLACE_LINES" => 16_000,
        "APPLY_PATCH" => 20_000,
        _ => 0,
    }
}

/// Guidance appended to error observations, keyed by error-code prefix.
const HINTS: &[(&str, &str)] = &[
    ("path_outside_workspace", "Paths must stay inside the workspace. Use a path relative to the workspace root."),
    ("root_outside_workspace", "The search root must be inside the workspace. Omit it to search everything."),
    ("source_outside_workspace", "Both paths of a move must be inside the workspace."),
    ("dest_outside_workspace", "Both paths of a move must be inside the workspace."),
    ("cwd_outside_workspace", "The working directory must be inside the workspace."),
    ("file_not_found", "The file does not exist. Use LIST_FILES or GREP to find the right path."),
    ("path_not_found", "The path does not exist (or is staged for deletion). Use LIST_FILES to check."),
    ("not_a_file", "The path is not a readable file. Use LIST_FILES to find files."),
    ("source_not_found", "The source path does not exist. Use LIST_FILES to check."),
    ("path_not_a_directory", "The path is not a directory. Pass a directory or omit the path."),
    ("root_not_a_directory", "The search root is not a directory. Omit it to search everything."),
    ("file_not_whitelisted", "Only source and text files can be read or edited."),
    ("file_is_binary", "Binary files cannot be read or edited."),
    ("file_too_large", "The file is too large. Read a line range with startLine/endLine or use SEARCH_FILE."),
    ("old_text_not_found", "old_str must match the current file exactly. READ_FILE first and copy the text verbatim."),
    ("old_text_required", "old_str must be non-empty. Use INSERT_LINE or WRITE_FILE to add text without replacing."),
    ("new_text_required", "new_str is required (use an empty string to delete)."),
    ("context_mismatch", "The patch context does not match the file. READ_FILE and regenerate the diff against the current content."),
    ("delete_mismatch", "A removed line does not match the file. READ_FILE and regenerate the diff."),
    ("diff_parse_failed", "The diff has no file headers. Use --- a/path, +++ b/path and @@ hunks."),
    ("partial_failure", "Some files failed. Check the per-file results and retry only those files."),
    ("bad_regex", "The pattern is not a valid regular expression. Escape special characters."),
    ("bad_glob", "The glob is invalid. Use patterns such as **/*.py or src/*.rs."),
    ("file_already_exists", "The file already exists. Use EDIT_FILE or WRITE_FILE to change it."),
    ("path_already_exists", "The path already exists."),
    ("dest_already_exists", "The destination already exists. Pick another path or delete it first."),
    ("parent_not_directory", "A parent of the path is a file, not a directory."),
    ("directory_not_empty", "Delete every file inside the directory before deleting the directory."),
    ("directory_has_pending_changes", "The directory has staged new files. Undo or apply them first."),
    ("invalid_move", "A directory cannot be moved into itself."),
    ("cannot_", "The workspace root itself cannot be modified."),
    ("no_edit_history", "There is no change to undo for this file."),
    ("insert_line_invalid", "insert_line must be 0 (top of file) or a line number."),
    ("start_line_", "startLine must be between 1 and the number of lines in the file."),
    ("end_line_invalid", "endLine must be greater than or equal to startLine."),
    ("no_pending_changes", "There are no pending changes to apply."),
    ("no_matching_pending_changes", "No pending change matches. Use one of available_paths."),
    ("tool_args_too_large", "Arguments are too large. Use APPLY_PATCH or several smaller edits."),
    ("tool_disabled", "This tool is disabled by configuration."),
    ("unknown_tool", "Unknown tool. Use one of availableTools."),
    ("permission_denied", "The call was refused by the tool's safety policy."),
    ("command_failed", "The command exited with a non-zero code. Read the output and fix the cause."),
    ("command_timeout", "The command timed out. Run a narrower command or raise timeoutMs."),
];

pub fn hint_for(code: &str) -> Option<&'static str> {
    if let Some((_, hint)) = HINTS.iter().find(|(prefix, _)| code.starts_with(prefix)) {
        return Some(hint);
    }
    code.ends_with("_required")
        .then_some("A required argument is missing. Check the tool's parameters.")
}

/// Dispatches tool calls against a [`ToolRegistry`].
pub struct ToolExecutor {
    registry: ToolRegistry,
    policy: ToolPolicy,
    max_args_chars: usize,
    audit: Option<Arc<AuditLogger>>,
    events: Option<Arc<EventBus>>,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, policy: ToolPolicy, max_args_chars: usize) -> Self {
        Self {
            registry,
            policy,
            max_args_chars,
            audit: None,
            events: None,
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    fn args_limit(&self, tool: &str) -> usize {
        self.max_args_chars.max(args_floor(tool))
    }

    fn audit(&self, event: AuditEvent, target: &str, outcome: AuditOutcome, details: Option<String>) {
        if let Some(audit) = &self.audit {
            audit.log(event, "agent", target, outcome, details);
        }
    }

    /// Run one call and build the envelope (before masking).
    pub async fn execute_value(&self, tool: &str, version: Option<&str>, args: &Value, ctx: &ToolContext) -> Value {
        let started = Instant::now();
        let name = canonical_tool_name(tool);
        let version = version
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .or_else(|| self.registry.get(&name).map(|t| t.version()))
            .unwrap_or(DEFAULT_TOOL_VERSION)
            .to_string();
        let envelope = Envelope {
            tool: &name,
            version: &version,
            args,
            started,
        };

        if let ToolCheckResult::Denied { reason, .. } = self.policy.check(&name) {
            warn!(tool = %name, reason = %reason, "Tool call denied by policy");
            self.audit(
                AuditEvent::ToolDenied { tool_name: name.clone() },
                &name,
                AuditOutcome::Denied,
                Some(reason),
            );
            return envelope.error("tool_disabled", Map::new());
        }

        let Some(handler) = self.registry.get(&name) else {
            let mut extras = Map::new();
            extras.insert("availableTools".into(), json!(self.registry.names()));
            return envelope.error("unknown_tool", extras);
        };

        let args_chars = serde_json::to_string(args).map(|s| s.chars().count()).unwrap_or(0);
        let limit = self.args_limit(&name);
        if args_chars > limit {
            self.audit(
                AuditEvent::ToolDenied { tool_name: name.clone() },
                &name,
                AuditOutcome::Denied,
                Some(format!("args {args_chars} > {limit}")),
            );
            let mut extras = Map::new();
            extras.insert("argsChars".into(), json!(args_chars));
            extras.insert("maxArgsChars".into(), json!(limit));
            return envelope.error("tool_args_too_large", extras);
        }

        info!(tool = %name, version = %version, "Tool call");
        let outcome = match handler.execute(args.clone(), ctx).await {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = %name, error = %e, "Tool execution failed");
                ToolResult::from_value(Value::Null)
                    .with_error(e.code())
                    .with_extra("message", json!(e.to_string()))
            }
        };
        let error = outcome.error_code();
        let observation = envelope.finish(outcome);
        let took_ms = started.elapsed().as_millis() as u64;

        info!(tool = %name, status = if error.is_some() { "error" } else { "ok" }, error = ?error, took_ms, "Tool result");
        self.audit(
            AuditEvent::ToolExecution { tool_name: name.clone() },
            &name,
            if error.is_some() { AuditOutcome::Failure } else { AuditOutcome::Success },
            error.clone(),
        );
        if let Some(events) = &self.events {
            events.publish(DomainEvent::ToolExecuted {
                tool_name: name,
                success: error.is_none(),
                duration_ms: took_ms,
                timestamp: Utc::now(),
            });
        }
        observation
    }
}

/// Common envelope fields for one call.
struct Envelope<'a> {
    tool: &'a str,
    version: &'a str,
    args: &'a Value,
    started: Instant,
}

impl Envelope<'_> {
    fn base(&self, status: &str) -> Map<String, Value> {
        let mut out = Map::new();
        out.insert("tool".into(), json!(self.tool));
        out.insert("version".into(), json!(self.version));
        out.insert("status".into(), json!(status));
        out.insert("tookMs".into(), json!(self.started.elapsed().as_millis() as u64));
        out.insert("args".into(), self.args.clone());
        out
    }

    fn error(&self, code: &str, extras: Map<String, Value>) -> Value {
        let mut out = self.base("error");
        out.insert("result".into(), Value::Null);
        out.insert("error".into(), json!(code));
        out.insert("hint".into(), json!(hint_for(code)));
        for (k, v) in extras {
            out.entry(k).or_insert(v);
        }
        Value::Object(out)
    }

    fn finish(&self, outcome: ToolResult) -> Value {
        let error = outcome.error_code();
        let mut out = self.base(if error.is_some() { "error" } else { "ok" });
        out.insert("result".into(), outcome.result);
        let mut extras = outcome.extras;
        let hint = extras
            .remove("hint")
            .filter(|h| h.as_str().is_some_and(|s| !s.is_empty()))
            .or_else(|| error.as_deref().and_then(hint_for).map(|h| json!(h)))
            .unwrap_or(Value::Null);
        out.insert("error".into(), json!(error));
        out.insert("hint".into(), hint);
        for (k, v) in extras {
            out.entry(k).or_insert(v);
        }
        Value::Object(out)
    }
}

#[async_trait]
impl ToolDispatcher for ToolExecutor {
    async fn execute(&self, tool: &str, version: Option<&str>, args: &Value, ctx: &ToolContext) -> String {
        let observation = self.execute_value(tool, version, args, ctx).await;
        redact_sensitive(&observation.to_string())
    }

    fn list_tool_specs(&self) -> Vec<ToolSpec> {
        self.registry
            .specs()
            .into_iter()
            .filter(|s| self.policy.check(&s.name).is_allowed())
            .collect()
    }

    fn is_run_command_enabled(&self) -> bool {
        self.policy.run_command_enabled() && self.registry.contains(RUN_COMMAND)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeagent_config::ToolsConfig;
    use codeagent_core::error::ToolError;
    use codeagent_core::is_tool_error;
    use codeagent_core::tool::Tool;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "READ_FILE"
        }
        fn description(&self) -> &str {
            "echo"
        }
        fn parameters_schema(&self) -> Value {
            json!({})
        }
        async fn execute(&self, arguments: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
            match arguments.get("fail").and_then(Value::as_str) {
                Some(code) => Ok(ToolResult::from_value(json!({ "error": code }))),
                None if arguments.get("boom").is_some() => Err(ToolError::InvalidArguments("path_required".into())),
                None => Ok(ToolResult::from_value(json!({ "content": arguments["text"] }))),
            }
        }
    }

    fn executor(config: ToolsConfig) -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        ToolExecutor::new(registry, ToolPolicy::from_config(&config), config.max_args_chars)
    }

    async fn call(ex: &ToolExecutor, tool: &str, args: Value) -> Value {
        let raw = ex.execute(tool, None, &args, &ToolContext::new("/w")).await;
        serde_json::from_str(&raw).unwrap()
    }

    #[tokio::test]
    async fn success_envelope() {
        let ex = executor(ToolsConfig::default());
        let obs = call(&ex, "read", json!({"text": "hi"})).await;
        assert_eq!(obs["tool"], "READ_FILE");
        assert_eq!(obs["version"], "v1");
        assert_eq!(obs["status"], "ok");
        assert_eq!(obs["result"]["content"], "hi");
        assert!(obs["error"].is_null());
        assert_eq!(obs["args"]["text"], "hi");
        assert!(!is_tool_error(&obs.to_string()));
    }

    #[tokio::test]
    async fn error_results_get_hints() {
        let ex = executor(ToolsConfig::default());
        let obs = call(&ex, "READ_FILE", json!({"fail": "file_not_found"})).await;
        assert_eq!(obs["status"], "error");
        assert_eq!(obs["error"], "file_not_found");
        assert!(obs["hint"].as_str().unwrap().contains("LIST_FILES"));

        let obs = call(&ex, "READ_FILE", json!({"boom": true})).await;
        assert_eq!(obs["error"], "path_required");
        assert!(obs["hint"].as_str().unwrap().contains("required"));
    }

    #[tokio::test]
    async fn unknown_and_disabled_tools() {
        let ex = executor(ToolsConfig {
            deny: vec!["GREP".into()],
            ..ToolsConfig::default()
        });
        let obs = call(&ex, "FLY", json!({})).await;
        assert_eq!(obs["error"], "unknown_tool");
        assert_eq!(obs["availableTools"], json!(["READ_FILE"]));

        let obs = call(&ex, "grep", json!({})).await;
        assert_eq!(obs["error"], "tool_disabled");
        let obs = call(&ex, "bash", json!({"command": "ls"})).await;
        assert_eq!(obs["error"], "tool_disabled");
        assert!(!ex.is_run_command_enabled());
    }

    #[tokio::test]
    async fn oversized_args_are_rejected() {
        let ex = executor(ToolsConfig {
            max_args_chars: 50,
            ..ToolsConfig::default()
        });
        let obs = call(&ex, "READ_FILE", json!({"text": "x".repeat(100)})).await;
        assert_eq!(obs["error"], "tool_args_too_large");
        assert_eq!(obs["maxArgsChars"], 50);
        assert_eq!(ex.args_limit("APPLY_PATCH"), 20_000);
        assert_eq!(ex.args_limit("EDIT_FILE"), 16_000);
    }

    #[tokio::test]
    async fn observations_are_masked() {
        let ex = executor(ToolsConfig::default());
        let raw = ex
            .execute("READ_FILE", None, &json!({"text": "password=hunter2"}), &ToolContext::new("/w"))
            .await;
        assert!(!raw.contains("hunter2"));
        assert!(raw.contains("******"));
    }

    #[tokio::test]
    async fn audit_and_events_record_calls() {
        let audit = Arc::new(AuditLogger::new());
        let bus = Arc::new(EventBus::new(8));
        let mut rx = bus.subscribe();
        let ex = executor(ToolsConfig::default())
            .with_audit(Arc::clone(&audit))
            .with_event_bus(Arc::clone(&bus));
        call(&ex, "READ_FILE", json!({"text": "a"})).await;
        call(&ex, "RUN_COMMAND", json!({})).await;
        assert_eq!(audit.count(), 2);
        assert_eq!(audit.entries_by_outcome(&AuditOutcome::Denied).len(), 1);
        match rx.recv().await.unwrap().as_ref() {
            DomainEvent::ToolExecuted { tool_name, success, .. } => {
                assert_eq!(tool_name, "READ_FILE");
                assert!(success);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn hint_lookup_by_prefix() {
        assert!(hint_for("bad_regex:unclosed group").is_some());
        assert!(hint_for("start_line_out_of_bounds").is_some());
        assert!(hint_for("query_required").is_some());
        assert!(hint_for("totally_new_code").is_none());
    }
}
