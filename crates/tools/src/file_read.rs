//! Read-only file tools: LIST_FILES, GREP, READ_FILE, OPEN_FILE_VIEW,
//! SEARCH_FILE, REPO_MAP and STRUCTURE_MAP.
//!
//! Each tool is a thin wrapper that pulls its arguments out of the JSON
//! the model sent and runs the matching [`Sandbox`] operation on the
//! blocking pool.

use async_trait::async_trait;
use codeagent_core::error::ToolError;
use codeagent_core::tool::{Tool, ToolContext, ToolResult};
use serde_json::{Value, json};

use crate::args::{int_arg, required_str, run_blocking, str_arg, str_list};
use crate::sandbox::{MapOptions, SandboxFactory};

/// LIST_FILES: files and directories under a path, optionally glob-filtered.
pub struct ListFilesTool {
    factory: SandboxFactory,
}

impl ListFilesTool {
    pub fn new(factory: SandboxFactory) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "LIST_FILES"
    }

    fn description(&self) -> &str {
        "List files under a workspace path, including staged new files."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory relative to the workspace root" },
                "glob": { "type": "string", "description": "Glob filter such as **/*.py" },
                "maxResults": { "type": "integer" },
                "maxDepth": { "type": "integer" }
            }
        })
    }

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let sandbox = self.factory.sandbox(ctx);
        let path = str_arg(&arguments, &["path"]).unwrap_or("").to_string();
        let glob = str_arg(&arguments, &["glob", "pattern"]).map(String::from);
        let max_results = int_arg(&arguments, &["maxResults", "max_results"]);
        let max_depth = int_arg(&arguments, &["maxDepth", "max_depth"]);
        let result = run_blocking(self.name(), move || {
            sandbox.list_files(&path, glob.as_deref(), max_results, max_depth)
        })
        .await?;
        ToolResult::from_serialize(&result)
    }
}

/// GREP: regex search across files under a root.
pub struct GrepTool {
    factory: SandboxFactory,
}

impl GrepTool {
    pub fn new(factory: SandboxFactory) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "GREP"
    }

    fn description(&self) -> &str {
        "Search file contents with a regular expression."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string" },
                "root": { "type": "string" },
                "fileGlob": { "type": "string" },
                "maxMatches": { "type": "integer" },
                "maxFiles": { "type": "integer" },
                "contextLines": { "type": "integer" }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let pattern = required_str(&arguments, &["pattern", "query"], "pattern_required")?.to_string();
        let sandbox = self.factory.sandbox(ctx);
        let root = str_arg(&arguments, &["root", "path"]).unwrap_or("").to_string();
        let file_glob = str_arg(&arguments, &["fileGlob", "file_glob", "glob"]).map(String::from);
        let max_matches = int_arg(&arguments, &["maxMatches", "max_matches"]);
        let max_files = int_arg(&arguments, &["maxFiles", "max_files"]);
        let context = int_arg(&arguments, &["contextLines", "context_lines", "context"]);
        let result = run_blocking(self.name(), move || {
            sandbox.grep(&pattern, &root, file_glob.as_deref(), max_matches, max_files, context)
        })
        .await?;
        ToolResult::from_serialize(&result)
    }
}

/// READ_FILE: numbered lines of one file, optionally a line range.
pub struct ReadFileTool {
    factory: SandboxFactory,
}

impl ReadFileTool {
    pub fn new(factory: SandboxFactory) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "READ_FILE"
    }

    fn description(&self) -> &str {
        "Read a file (or a line range of it) with line numbers."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "startLine": { "type": "integer" },
                "endLine": { "type": "integer" },
                "maxChars": { "type": "integer" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let path = required_str(&arguments, &["path", "filePath", "file_path"], "path_required")?.to_string();
        let sandbox = self.factory.sandbox(ctx);
        let start = int_arg(&arguments, &["startLine", "start_line"]);
        let end = int_arg(&arguments, &["endLine", "end_line"]);
        let max_chars = int_arg(&arguments, &["maxChars", "max_chars"]);
        let result = run_blocking(self.name(), move || sandbox.read_file(&path, start, end, max_chars)).await?;
        ToolResult::from_serialize(&result)
    }
}

/// OPEN_FILE_VIEW: a window of lines centred on a line number.
pub struct OpenFileViewTool {
    factory: SandboxFactory,
}

impl OpenFileViewTool {
    pub fn new(factory: SandboxFactory) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl Tool for OpenFileViewTool {
    fn name(&self) -> &str {
        "OPEN_FILE_VIEW"
    }

    fn description(&self) -> &str {
        "Open a windowed view of a file around a line."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "lineNumber": { "type": "integer" },
                "window": { "type": "integer" },
                "maxChars": { "type": "integer" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let path = required_str(&arguments, &["path", "filePath", "file_path"], "path_required")?.to_string();
        let sandbox = self.factory.sandbox(ctx);
        let line = int_arg(&arguments, &["lineNumber", "line_number", "line"]);
        let window = int_arg(&arguments, &["window"]);
        let max_chars = int_arg(&arguments, &["maxChars", "max_chars"]);
        let result = run_blocking(self.name(), move || sandbox.view_file(&path, line, window, max_chars)).await?;
        ToolResult::from_serialize(&result)
    }
}

/// SEARCH_FILE: regex search inside one file.
pub struct SearchFileTool {
    factory: SandboxFactory,
}

impl SearchFileTool {
    pub fn new(factory: SandboxFactory) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl Tool for SearchFileTool {
    fn name(&self) -> &str {
        "SEARCH_FILE"
    }

    fn description(&self) -> &str {
        "Find the lines of one file matching a regular expression."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "pattern": { "type": "string" },
                "maxMatches": { "type": "integer" },
                "maxLines": { "type": "integer" }
            },
            "required": ["path", "pattern"]
        })
    }

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let path = required_str(&arguments, &["path", "filePath", "file_path"], "path_required")?.to_string();
        let pattern = required_str(&arguments, &["pattern", "query"], "pattern_required")?.to_string();
        let sandbox = self.factory.sandbox(ctx);
        let max_matches = int_arg(&arguments, &["maxMatches", "max_matches"]);
        let max_lines = int_arg(&arguments, &["maxLines", "max_lines"]);
        let result = run_blocking(self.name(), move || {
            sandbox.search_in_file(&path, &pattern, max_matches, max_lines)
        })
        .await?;
        ToolResult::from_serialize(&result)
    }
}

/// REPO_MAP (ranked) and STRUCTURE_MAP (alphabetical) share one wrapper.
pub struct RepoMapTool {
    factory: SandboxFactory,
    ranked: bool,
}

impl RepoMapTool {
    pub fn ranked(factory: SandboxFactory) -> Self {
        Self { factory, ranked: true }
    }

    pub fn structure(factory: SandboxFactory) -> Self {
        Self { factory, ranked: false }
    }
}

fn map_options(arguments: &Value) -> MapOptions {
    MapOptions {
        max_depth: int_arg(arguments, &["maxDepth", "max_depth"]),
        max_files: int_arg(arguments, &["maxFiles", "max_files"]),
        max_chars: int_arg(arguments, &["maxChars", "max_chars"]),
        focus: str_list(arguments, &["focus", "focusPaths", "focus_paths"]),
    }
}

#[async_trait]
impl Tool for RepoMapTool {
    fn name(&self) -> &str {
        if self.ranked { "REPO_MAP" } else { "STRUCTURE_MAP" }
    }

    fn description(&self) -> &str {
        if self.ranked {
            "Tree of the repository with the most depended-on files first."
        } else {
            "Alphabetical tree of the repository."
        }
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "maxDepth": { "type": "integer" },
                "maxFiles": { "type": "integer" },
                "maxChars": { "type": "integer" },
                "focus": { "type": "array", "items": { "type": "string" } }
            }
        })
    }

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let sandbox = self.factory.sandbox(ctx);
        let path = str_arg(&arguments, &["path", "root"]).unwrap_or("").to_string();
        let options = map_options(&arguments);
        let ranked = self.ranked;
        let result = run_blocking(self.name(), move || {
            if ranked {
                sandbox.repo_map(&path, &options)
            } else {
                sandbox.structure_map(&path, &options)
            }
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
    async fn read_file_returns_numbered_lines() {
        let (dir, factory) = factory_in();
        std::fs::write(dir.path().join("a.py"), "def foo():\n    pass\n").unwrap();
        let ctx = ToolContext::new(dir.path());
        let out = ReadFileTool::new(factory)
            .execute(json!({"path": "a.py", "start_line": 2}), &ctx)
            .await
            .unwrap();
        assert!(out.error_code().is_none());
        assert_eq!(out.result["content"], "2→    pass\n");
        assert_eq!(out.result["startLine"], 2);
    }

    #[tokio::test]
    async fn missing_required_arguments_are_argument_errors() {
        let (dir, factory) = factory_in();
        let ctx = ToolContext::new(dir.path());
        let err = ReadFileTool::new(factory.clone())
            .execute(json!({}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "path_required");
        let err = GrepTool::new(factory).execute(json!({"pattern": " "}), &ctx).await.unwrap_err();
        assert_eq!(err.code(), "pattern_required");
    }

    #[tokio::test]
    async fn grep_and_list_see_the_workspace() {
        let (dir, factory) = factory_in();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/m.rs"), "fn foo() {}\n").unwrap();
        let ctx = ToolContext::new(dir.path());

        let out = GrepTool::new(factory.clone())
            .execute(json!({"pattern": "fn \\w+"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.result["matches"][0]["filePath"], "src/m.rs");

        let out = ListFilesTool::new(factory)
            .execute(json!({"glob": "**/*.rs"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.result["files"], json!(["src/m.rs"]));
    }

    #[tokio::test]
    async fn map_tools_share_one_wrapper() {
        let (dir, factory) = factory_in();
        std::fs::write(dir.path().join("README.md"), "# x\n").unwrap();
        let ctx = ToolContext::new(dir.path());
        let ranked = RepoMapTool::ranked(factory.clone());
        let plain = RepoMapTool::structure(factory);
        assert_eq!(ranked.name(), "REPO_MAP");
        assert_eq!(plain.name(), "STRUCTURE_MAP");
        let out = plain.execute(json!({}), &ctx).await.unwrap();
        assert!(out.result["content"].as_str().unwrap().contains("README.md"));
        let opts = map_options(&json!({"focus": "a.py,b.py", "maxDepth": 2}));
        assert_eq!(opts.focus, vec!["a.py", "b.py"]);
        assert_eq!(opts.max_depth, Some(2));
    }
}
