//! Multi-file change tools: APPLY_PATCH and BATCH_REPLACE.

use async_trait::async_trait;
use codeagent_core::error::ToolError;
use codeagent_core::tool::{Tool, ToolContext, ToolResult};
use serde_json::{Value, json};

use crate::args::{dry_run, int_arg, run_blocking, str_arg};
use crate::sandbox::SandboxFactory;

/// APPLY_PATCH: apply a unified diff touching one or more files.
pub struct ApplyPatchTool {
    factory: SandboxFactory,
}

impl ApplyPatchTool {
    pub fn new(factory: SandboxFactory) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl Tool for ApplyPatchTool {
    fn name(&self) -> &str {
        "APPLY_PATCH"
    }

    fn description(&self) -> &str {
        "Apply a unified diff. Every file must apply for the call to succeed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "diff": { "type": "string", "description": "Unified diff text (--- / +++ / @@ hunks)" },
                "dry_run": { "type": "boolean" }
            },
            "required": ["diff"]
        })
    }

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let diff = str_arg(&arguments, &["diff", "patch"]).unwrap_or("").to_string();
        let dry = dry_run(&arguments);
        let sandbox = self.factory.sandbox(ctx);
        let result = run_blocking(self.name(), move || sandbox.apply_patch(&diff, dry)).await?;
        ToolResult::from_serialize(&result)
    }
}

/// BATCH_REPLACE: literal find-and-replace across a glob of files.
pub struct BatchReplaceTool {
    factory: SandboxFactory,
}

impl BatchReplaceTool {
    pub fn new(factory: SandboxFactory) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl Tool for BatchReplaceTool {
    fn name(&self) -> &str {
        "BATCH_REPLACE"
    }

    fn description(&self) -> &str {
        "Replace a literal string in every matching file under a directory."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "glob": { "type": "string" },
                "old_str": { "type": "string" },
                "new_str": { "type": "string" },
                "maxFiles": { "type": "integer" },
                "maxReplacements": { "type": "integer" },
                "dry_run": { "type": "boolean" }
            },
            "required": ["old_str", "new_str"]
        })
    }

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let root = str_arg(&arguments, &["path", "root"]).unwrap_or("").to_string();
        let glob = str_arg(&arguments, &["glob", "fileGlob", "file_glob"]).map(String::from);
        let old = str_arg(&arguments, &["old_str", "oldStr", "old_text", "oldText"]).unwrap_or("").to_string();
        let new = str_arg(&arguments, &["new_str", "newStr", "new_text", "newText"]).map(String::from);
        let max_files = int_arg(&arguments, &["maxFiles", "max_files"]);
        let max_replacements = int_arg(&arguments, &["maxReplacements", "max_replacements"]);
        let dry = dry_run(&arguments);
        let sandbox = self.factory.sandbox(ctx);
        let result = run_blocking(self.name(), move || {
            sandbox.batch_replace(
                &root,
                glob.as_deref(),
                &old,
                new.as_deref(),
                max_files,
                max_replacements,
                dry,
            )
        })
        .await?;
        ToolResult::from_serialize(&result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::factory_in;

    #[tokio::test]
    async fn patch_tool_reports_summary() {
        let (dir, factory) = factory_in();
        std::fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        let ctx = ToolContext::new(dir.path());
        let diff = "--- a/a.py\n+++ b/a.py\n@@ -1,1 +1,1 @@\n-x = 1\n+x = 2\n";
        let out = ApplyPatchTool::new(factory.clone())
            .execute(json!({"diff": diff}), &ctx)
            .await
            .unwrap();
        assert!(out.error_code().is_none());
        assert_eq!(out.result["filesApplied"], 1);
        let change = factory.store().get_pending_change("a.py", None, None).unwrap();
        assert_eq!(change.new_content.as_deref(), Some("x = 2\n"));
    }

    #[tokio::test]
    async fn empty_diff_is_an_error_result() {
        let (dir, factory) = factory_in();
        let ctx = ToolContext::new(dir.path());
        let out = ApplyPatchTool::new(factory).execute(json!({}), &ctx).await.unwrap();
        assert_eq!(out.error_code().as_deref(), Some("diff_required"));
    }

    #[tokio::test]
    async fn batch_tool_requires_new_str() {
        let (dir, factory) = factory_in();
        std::fs::write(dir.path().join("a.py"), "foo\n").unwrap();
        let ctx = ToolContext::new(dir.path());
        let tool = BatchReplaceTool::new(factory);
        let out = tool.execute(json!({"old_str": "foo"}), &ctx).await.unwrap();
        assert_eq!(out.error_code().as_deref(), Some("new_text_required"));
        let out = tool
            .execute(json!({"old_str": "foo", "new_str": "bar", "glob": "*.py"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.result["replacements"], 1);
    }
}
