//! Tool allowlist policy: which tools the model may invoke.

use codeagent_config::ToolsConfig;
use codeagent_core::tool::canonical_tool_name;
use std::collections::HashSet;

const RUN_COMMAND: &str = "RUN_COMMAND";

/// Result of checking a tool against the policy.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCheckResult {
    Allowed,
    Denied { tool: String, reason: String },
}

impl ToolCheckResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, ToolCheckResult::Allowed)
    }
}

/// Allow/deny lists over canonical tool names.
///
/// Rules:
/// - `deny` always wins
/// - empty `allow` (or `"*"`) allows everything not denied
/// - RUN_COMMAND additionally requires `run_command_enabled`
#[derive(Debug, Clone, Default)]
pub struct ToolPolicy {
    allow: HashSet<String>,
    deny: HashSet<String>,
    run_command_enabled: bool,
}

impl ToolPolicy {
    pub fn from_config(config: &ToolsConfig) -> Self {
        Self {
            allow: config.allow.iter().map(|t| normalize(t)).collect(),
            deny: config.deny.iter().map(|t| normalize(t)).collect(),
            run_command_enabled: config.run_command_enabled,
        }
    }

    /// Everything allowed except RUN_COMMAND.
    pub fn permissive() -> Self {
        Self::default()
    }

    pub fn run_command_enabled(&self) -> bool {
        self.run_command_enabled
    }

    pub fn check(&self, tool: &str) -> ToolCheckResult {
        let name = canonical_tool_name(tool);
        if self.deny.contains(&name) {
            return ToolCheckResult::Denied {
                tool: name,
                reason: "Tool is on the deny list".into(),
            };
        }
        if name == RUN_COMMAND && !self.run_command_enabled {
            return ToolCheckResult::Denied {
                tool: name,
                reason: "RUN_COMMAND is disabled".into(),
            };
        }
        if self.allow.is_empty() || self.allow.contains("*") || self.allow.contains(&name) {
            ToolCheckResult::Allowed
        } else {
            ToolCheckResult::Denied {
                reason: format!(
                    "Tool '{}' not in allowlist ({} tools configured)",
                    name,
                    self.allow.len()
                ),
                tool: name,
            }
        }
    }
}

fn normalize(raw: &str) -> String {
    if raw.trim() == "*" {
        "*".into()
    } else {
        canonical_tool_name(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(allow: &[&str], deny: &[&str], run_command: bool) -> ToolsConfig {
        ToolsConfig {
            allow: allow.iter().map(|s| s.to_string()).collect(),
            deny: deny.iter().map(|s| s.to_string()).collect(),
            run_command_enabled: run_command,
            ..ToolsConfig::default()
        }
    }

    #[test]
    fn empty_allowlist_allows_all() {
        let policy = ToolPolicy::from_config(&config(&[], &[], false));
        assert!(policy.check("READ_FILE").is_allowed());
        assert!(policy.check("edit").is_allowed());
    }

    #[test]
    fn deny_wins_over_allow() {
        let policy = ToolPolicy::from_config(&config(&["*"], &["delete_file"], false));
        assert!(!policy.check("DELETE_FILE").is_allowed());
        assert!(policy.check("GREP").is_allowed());
    }

    #[test]
    fn allowlist_restricts() {
        let policy = ToolPolicy::from_config(&config(&["read", "GREP"], &[], false));
        assert!(policy.check("READ_FILE").is_allowed());
        match policy.check("EDIT_FILE") {
            ToolCheckResult::Denied { tool, .. } => assert_eq!(tool, "EDIT_FILE"),
            other => panic!("Expected Denied, got: {other:?}"),
        }
    }

    #[test]
    fn run_command_needs_switch() {
        assert!(!ToolPolicy::permissive().check("bash").is_allowed());
        let policy = ToolPolicy::from_config(&config(&[], &[], true));
        assert!(policy.check("RUN_COMMAND").is_allowed());
        assert!(policy.run_command_enabled());
    }
}
