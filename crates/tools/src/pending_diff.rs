//! APPLY_PENDING_DIFF: the confirmation step for staged changes.
//!
//! Applying writes each selected change through the direct-write path (so
//! it gets an undo snapshot) and then drops it from the store. Rejecting
//! just drops it.

use async_trait::async_trait;
use codeagent_core::error::ToolError;
use codeagent_core::tool::{Tool, ToolContext, ToolResult};
use codeagent_security::normalize_rel_path;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::args::{bool_arg, run_blocking, str_arg, str_list};
use crate::sandbox::{Sandbox, SandboxFactory};

/// Outcome of applying or rejecting a selection of pending changes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// Paths applied (or rejected) successfully.
    pub applied: Vec<String>,
    /// `path: error_code` for every change that failed to apply.
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolveError {
    NoPendingChanges,
    NoMatchingPendingChanges { available: Vec<String> },
}

impl ResolveError {
    pub fn code(&self) -> &'static str {
        match self {
            ResolveError::NoPendingChanges => "no_pending_changes",
            ResolveError::NoMatchingPendingChanges { .. } => "no_matching_pending_changes",
        }
    }
}

/// Apply (or reject) the pending changes of `sandbox`'s scope whose path is
/// in `paths`, or all of them when `paths` is empty.
pub fn resolve_pending(sandbox: &Sandbox, paths: &[String], reject: bool) -> Result<Resolution, ResolveError> {
    let all = sandbox.pending_changes();
    if all.is_empty() {
        return Err(ResolveError::NoPendingChanges);
    }
    let wanted: Vec<String> = paths.iter().map(|p| normalize_rel_path(p)).collect();
    let targets: Vec<_> = all
        .iter()
        .filter(|c| wanted.is_empty() || wanted.contains(&c.path))
        .cloned()
        .collect();
    if targets.is_empty() {
        return Err(ResolveError::NoMatchingPendingChanges {
            available: all.into_iter().map(|c| c.path).collect(),
        });
    }

    let mut resolution = Resolution::default();
    for change in targets {
        if reject {
            sandbox.store().remove_change(&change.id, "rejected");
            resolution.applied.push(change.path);
            continue;
        }
        let written = sandbox.apply_to_file(&change.path, change.new_content.as_deref(), change.is_delete());
        match written.error {
            None => {
                sandbox.store().remove_change(&change.id, "applied");
                resolution.applied.push(change.path);
            }
            Some(code) => {
                warn!(path = %change.path, error = %code, "Pending change failed to apply");
                resolution.errors.push(format!("{}: {code}", change.path));
            }
        }
    }
    info!(
        applied = resolution.applied.len(),
        failed = resolution.errors.len(),
        reject,
        "Pending changes resolved"
    );
    Ok(resolution)
}

pub struct ApplyPendingDiffTool {
    factory: SandboxFactory,
}

impl ApplyPendingDiffTool {
    pub fn new(factory: SandboxFactory) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl Tool for ApplyPendingDiffTool {
    fn name(&self) -> &str {
        "APPLY_PENDING_DIFF"
    }

    fn description(&self) -> &str {
        "Apply or reject pending diffs. If no path is given, applies all pending changes."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "paths": { "type": "array", "items": { "type": "string" } },
                "reject": { "type": "boolean" }
            }
        })
    }

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let mut paths = str_list(&arguments, &["paths"]);
        if let Some(path) = str_arg(&arguments, &["path"]).map(str::trim).filter(|p| !p.is_empty()) {
            paths.push(path.to_string());
        }
        let reject = bool_arg(&arguments, &["reject"]);
        let sandbox = self.factory.sandbox(ctx);
        let outcome = run_blocking(self.name(), move || resolve_pending(&sandbox, &paths, reject)).await?;

        let resolution = match outcome {
            Ok(resolution) => resolution,
            Err(err) => {
                let mut out = ToolResult::from_value(json!({ "success": false })).with_error(err.code());
                if let ResolveError::NoMatchingPendingChanges { available } = err {
                    out = out.with_extra("available_paths", json!(available));
                }
                return Ok(out);
            }
        };

        let out = if resolution.errors.is_empty() {
            let hint = if reject {
                "Pending diffs rejected and cleared."
            } else {
                "Pending diffs applied successfully."
            };
            ToolResult::from_value(json!({ "success": true, "rejected": reject })).with_extra("hint", json!(hint))
        } else {
            ToolResult::from_value(json!({ "success": false, "rejected": reject }))
                .with_error("partial_failure")
                .with_extra(
                    "hint",
                    json!(format!("Some changes failed to apply: {}", resolution.errors.join(", "))),
                )
                .with_extra("errors", json!(resolution.errors))
        };
        Ok(out.with_extra("applied", json!(resolution.applied)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::factory_in;

    #[tokio::test]
    async fn applies_all_staged_changes_to_disk() {
        let (dir, factory) = factory_in();
        std::fs::write(dir.path().join("a.py"), "old\n").unwrap();
        let sandbox = factory.for_root(dir.path(), None);
        sandbox.edit_file("a.py", "old", "new", false);
        sandbox.create_file("b.py", "b\n", false);

        let ctx = ToolContext::new(dir.path());
        let out = ApplyPendingDiffTool::new(factory.clone())
            .execute(json!({}), &ctx)
            .await
            .unwrap();
        assert!(out.error_code().is_none());
        assert_eq!(out.extras["applied"], json!(["a.py", "b.py"]));
        assert_eq!(std::fs::read_to_string(dir.path().join("a.py")).unwrap(), "new\n");
        assert_eq!(std::fs::read_to_string(dir.path().join("b.py")).unwrap(), "b\n");
        assert!(factory.store().is_empty());
    }

    #[tokio::test]
    async fn reject_selected_path_only() {
        let (dir, factory) = factory_in();
        let sandbox = factory.for_root(dir.path(), None);
        sandbox.create_file("a.py", "a\n", false);
        sandbox.create_file("b.py", "b\n", false);

        let resolution = resolve_pending(&sandbox, &["./a.py".to_string()], true).unwrap();
        assert_eq!(resolution.applied, vec!["a.py"]);
        assert!(!dir.path().join("a.py").exists());
        let left: Vec<_> = sandbox.pending_changes().into_iter().map(|c| c.path).collect();
        assert_eq!(left, vec!["b.py"]);
    }

    #[tokio::test]
    async fn empty_and_unmatched_selections() {
        let (dir, factory) = factory_in();
        let ctx = ToolContext::new(dir.path());
        let tool = ApplyPendingDiffTool::new(factory.clone());
        let out = tool.execute(json!({}), &ctx).await.unwrap();
        assert_eq!(out.error_code().as_deref(), Some("no_pending_changes"));

        factory.for_root(dir.path(), None).create_file("a.py", "a\n", false);
        let out = tool.execute(json!({"path": "zzz.py"}), &ctx).await.unwrap();
        assert_eq!(out.error_code().as_deref(), Some("no_matching_pending_changes"));
        assert_eq!(out.extras["available_paths"], json!(["a.py"]));
    }
}
