//! RUN_COMMAND: execute a shell command inside the workspace.
//!
//! Supports command allowlisting, workspace-confined working directories
//! and a timeout. Only registered when `tools.run_command_enabled` is set.

use async_trait::async_trait;
use codeagent_core::error::ToolError;
use codeagent_core::text::truncate_with;
use codeagent_core::tool::{Tool, ToolContext, ToolResult};
use codeagent_security::resolve_under_workspace;
use serde::Serialize;
use serde_json::{Value, json};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::args::{int_arg, str_arg};

const DEFAULT_TIMEOUT_MS: u64 = 120_000;
const MAX_TIMEOUT_MS: u64 = 600_000;
const MAX_OUTPUT_CHARS: usize = 20_000;

/// Commands allowed by default: read-only inspection plus common build tools.
pub fn default_allowed_commands() -> Vec<String> {
    [
        "ls", "dir", "cat", "head", "tail", "echo", "pwd", "wc", "grep", "find", "which", "git",
        "cargo", "rustc", "go", "node", "npm", "npx", "python", "python3", "pytest", "pip", "mvn",
        "gradle", "./gradlew", "make", "java", "javac",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutcome {
    pub command: String,
    pub cwd: String,
    pub exit_code: i32,
    pub output: String,
    pub error: Option<String>,
    pub timeout: bool,
    pub took_ms: u64,
}

/// Execute shell commands with safety constraints.
pub struct RunCommandTool {
    /// If non-empty, only these commands are allowed.
    allowed_commands: Vec<String>,
}

impl RunCommandTool {
    pub fn new(allowed_commands: Vec<String>) -> Self {
        Self { allowed_commands }
    }

    fn is_command_allowed(&self, command: &str) -> bool {
        if self.allowed_commands.is_empty() {
            return true;
        }
        let base_cmd = command.split_whitespace().next().unwrap_or("").trim();
        self.allowed_commands.iter().any(|a| a == base_cmd)
    }
}

fn combine_output(stdout: &[u8], stderr: &[u8]) -> String {
    let stdout = String::from_utf8_lossy(stdout);
    let stderr = String::from_utf8_lossy(stderr);
    let combined = if stderr.trim().is_empty() {
        stdout.into_owned()
    } else {
        format!("{stdout}\n[stderr]: {stderr}")
    };
    truncate_with(combined.trim(), MAX_OUTPUT_CHARS, "\n...[output truncated]")
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "RUN_COMMAND"
    }

    fn description(&self) -> &str {
        "Run a shell command in the workspace and return its exit code and output."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "The shell command to execute" },
                "cwd": { "type": "string", "description": "Working directory relative to the workspace" },
                "timeoutMs": { "type": "integer" }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let command = str_arg(&arguments, &["command", "cmd"]).unwrap_or("").trim().to_string();
        if command.is_empty() {
            return Err(ToolError::InvalidArguments("command_is_blank".into()));
        }
        let timeout_ms = match int_arg(&arguments, &["timeoutMs", "timeout_ms"]) {
            Some(t) if t < 0 => return Err(ToolError::InvalidArguments("timeout_ms_invalid".into())),
            Some(0) | None => DEFAULT_TIMEOUT_MS,
            Some(t) => (t as u64).min(MAX_TIMEOUT_MS),
        };
        if !self.is_command_allowed(&command) {
            return Err(ToolError::PermissionDenied {
                tool_name: self.name().into(),
                reason: format!(
                    "Command '{}' not in allowlist",
                    command.split_whitespace().next().unwrap_or("")
                ),
            });
        }
        let cwd_raw = str_arg(&arguments, &["cwd", "workdir"]).unwrap_or("");
        let cwd = resolve_under_workspace(&ctx.workspace_root, cwd_raw)
            .map_err(|_| ToolError::InvalidArguments("cwd_outside_workspace".into()))?;

        debug!(command = %command, cwd = %cwd.display(), timeout_ms, "Executing shell command");
        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", &command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", &command]);
            c
        };
        cmd.current_dir(&cwd).kill_on_drop(true);

        let started = Instant::now();
        let waited = tokio::time::timeout(Duration::from_millis(timeout_ms), cmd.output()).await;
        let mut outcome = CommandOutcome {
            command: command.clone(),
            cwd: cwd.display().to_string(),
            ..CommandOutcome::default()
        };
        match waited {
            Err(_) => {
                warn!(command = %command, timeout_ms, "Command timed out");
                outcome.exit_code = -1;
                outcome.timeout = true;
                outcome.error = Some("command_timeout".into());
            }
            Ok(Err(e)) => {
                return Err(ToolError::ExecutionFailed {
                    tool_name: self.name().into(),
                    reason: e.to_string(),
                });
            }
            Ok(Ok(output)) => {
                outcome.exit_code = output.status.code().unwrap_or(-1);
                outcome.output = combine_output(&output.stdout, &output.stderr);
                if !output.status.success() {
                    warn!(command = %command, exit_code = outcome.exit_code, "Command failed");
                    outcome.error = Some("command_failed".into());
                }
            }
        }
        outcome.took_ms = started.elapsed().as_millis() as u64;
        let exit_code = outcome.exit_code;
        Ok(ToolResult::from_serialize(&outcome)?.with_extra("exitCode", json!(exit_code)))
    }
}
