//! Mutating file tools.
//!
//! Every operation goes through the [`Sandbox`] write path: in staged mode
//! it becomes a pending change, in direct mode it hits the disk after an
//! undo snapshot. `dry_run` computes the result without doing either.
//!
//! [`Sandbox`]: crate::sandbox::Sandbox

use async_trait::async_trait;
use codeagent_core::error::ToolError;
use codeagent_core::tool::{Tool, ToolContext, ToolResult};
use serde_json::{Value, json};

use crate::args::{dry_run, int_arg, present_str, required_str, run_blocking, str_arg};
use crate::sandbox::{EditFileResult, Sandbox, SandboxFactory};

const PATH_KEYS: &[&str] = &["path", "filePath", "file_path"];

/// The single-file write operations exposed as tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Edit,
    Create,
    Write,
    InsertLine,
    ReplaceLines,
    Undo,
    Delete,
    CreateDirectory,
    Move,
}

impl WriteOp {
    pub const ALL: [WriteOp; 9] = [
        WriteOp::Edit,
        WriteOp::Create,
        WriteOp::Write,
        WriteOp::InsertLine,
        WriteOp::ReplaceLines,
        WriteOp::Undo,
        WriteOp::Delete,
        WriteOp::CreateDirectory,
        WriteOp::Move,
    ];

    pub fn tool_name(self) -> &'static str {
        match self {
            WriteOp::Edit => "EDIT_FILE",
            WriteOp::Create => "CREATE_FILE",
            WriteOp::Write => "WRITE_FILE",
            WriteOp::InsertLine => "INSERT_LINE",
            WriteOp::ReplaceLines => "REPLACE_LINES",
            WriteOp::Undo => "UNDO_EDIT",
            WriteOp::Delete => "DELETE_FILE",
            WriteOp::CreateDirectory => "CREATE_DIRECTORY",
            WriteOp::Move => "MOVE_PATH",
        }
    }

    fn description(self) -> &'static str {
        match self {
            WriteOp::Edit => "Replace one exact occurrence of old_str with new_str in a file.",
            WriteOp::Create => "Create a new file. Fails if the path already exists.",
            WriteOp::Write => "Overwrite a file with new content, creating it if the parent exists.",
            WriteOp::InsertLine => "Insert text after a line number (0 inserts at the top).",
            WriteOp::ReplaceLines => "Replace an inclusive range of lines with new content.",
            WriteOp::Undo => "Undo the most recent change to a file.",
            WriteOp::Delete => "Delete a file, or a directory whose contents are already deleted.",
            WriteOp::CreateDirectory => "Create a directory (and missing parents) immediately.",
            WriteOp::Move => "Move or rename a file or directory.",
        }
    }

    fn schema(self) -> Value {
        let (properties, required) = match self {
            WriteOp::Edit => (
                json!({
                    "path": { "type": "string" },
                    "old_str": { "type": "string" },
                    "new_str": { "type": "string" }
                }),
                json!(["path", "old_str", "new_str"]),
            ),
            WriteOp::Create => (
                json!({ "path": { "type": "string" }, "file_text": { "type": "string" } }),
                json!(["path", "file_text"]),
            ),
            WriteOp::Write => (
                json!({ "path": { "type": "string" }, "content": { "type": "string" } }),
                json!(["path", "content"]),
            ),
            WriteOp::InsertLine => (
                json!({
                    "path": { "type": "string" },
                    "insert_line": { "type": "integer" },
                    "new_str": { "type": "string" }
                }),
                json!(["path", "insert_line", "new_str"]),
            ),
            WriteOp::ReplaceLines => (
                json!({
                    "path": { "type": "string" },
                    "startLine": { "type": "integer" },
                    "endLine": { "type": "integer" },
                    "newContent": { "type": "string" }
                }),
                json!(["path", "startLine", "endLine", "newContent"]),
            ),
            WriteOp::Undo | WriteOp::Delete | WriteOp::CreateDirectory => {
                (json!({ "path": { "type": "string" } }), json!(["path"]))
            }
            WriteOp::Move => (
                json!({ "source": { "type": "string" }, "destination": { "type": "string" } }),
                json!(["source", "destination"]),
            ),
        };
        let mut props = properties;
        if self != WriteOp::Undo
            && let Some(map) = props.as_object_mut()
        {
            map.insert("dry_run".into(), json!({ "type": "boolean" }));
        }
        json!({ "type": "object", "properties": props, "required": required })
    }
}

/// Arguments resolved up front so the blocking closure owns everything.
enum Call {
    Edit { path: String, old: String, new: String },
    Create { path: String, text: String },
    Write { path: String, content: String },
    Insert { path: String, line: i64, text: String },
    Replace { path: String, start: i64, end: i64, content: String },
    Undo { path: String },
    Delete { path: String },
    Mkdir { path: String },
    Move { source: String, dest: String },
}

impl Call {
    fn parse(op: WriteOp, args: &Value) -> Result<Self, ToolError> {
        let path = || required_str(args, PATH_KEYS, "path_required").map(String::from);
        let call = match op {
            WriteOp::Edit => Call::Edit {
                path: path()?,
                old: str_arg(args, &["old_str", "oldStr", "old_text", "oldText"]).unwrap_or("").to_string(),
                new: str_arg(args, &["new_str", "newStr", "new_text", "newText"]).unwrap_or("").to_string(),
            },
            WriteOp::Create => Call::Create {
                path: path()?,
                text: present_str(args, &["file_text", "fileText", "content"], "file_text_required")?.to_string(),
            },
            WriteOp::Write => Call::Write {
                path: path()?,
                content: present_str(args, &["content", "file_text", "fileText"], "content_required")?.to_string(),
            },
            WriteOp::InsertLine => Call::Insert {
                path: path()?,
                line: int_arg(args, &["insert_line", "insertLine", "line"])
                    .ok_or_else(|| ToolError::InvalidArguments("insert_line_required".into()))?,
                text: present_str(args, &["new_str", "newStr", "text", "content"], "new_str_required")?.to_string(),
            },
            WriteOp::ReplaceLines => Call::Replace {
                path: path()?,
                start: int_arg(args, &["startLine", "start_line"]).unwrap_or(0),
                end: int_arg(args, &["endLine", "end_line"]).unwrap_or(0),
                content: str_arg(args, &["newContent", "new_content", "content"]).unwrap_or("").to_string(),
            },
            WriteOp::Undo => Call::Undo { path: path()? },
            WriteOp::Delete => Call::Delete { path: path()? },
            WriteOp::CreateDirectory => Call::Mkdir { path: path()? },
            WriteOp::Move => Call::Move {
                source: required_str(args, &["source", "src", "from"], "source_required")?.to_string(),
                dest: required_str(args, &["destination", "dest", "target", "to"], "destination_required")?
                    .to_string(),
            },
        };
        Ok(call)
    }

    fn run(self, sandbox: &Sandbox, dry: bool) -> EditFileResult {
        match self {
            Call::Edit { path, old, new } => sandbox.edit_file(&path, &old, &new, dry),
            Call::Create { path, text } => sandbox.create_file(&path, &text, dry),
            Call::Write { path, content } => sandbox.overwrite_file(&path, &content, dry),
            Call::Insert { path, line, text } => sandbox.insert_into_file(&path, line, &text, dry),
            Call::Replace { path, start, end, content } => sandbox.replace_lines(&path, start, end, &content, dry),
            Call::Undo { path } => sandbox.undo_edit(&path),
            Call::Delete { path } => sandbox.delete_path(&path, dry),
            Call::Mkdir { path } => sandbox.create_directory(&path, dry),
            Call::Move { source, dest } => sandbox.move_path(&source, &dest, dry),
        }
    }
}

/// One write operation bound to the shared sandbox factory.
pub struct FileWriteTool {
    factory: SandboxFactory,
    op: WriteOp,
}

impl FileWriteTool {
    pub fn new(factory: SandboxFactory, op: WriteOp) -> Self {
        Self { factory, op }
    }

    /// One tool per [`WriteOp`].
    pub fn all(factory: &SandboxFactory) -> Vec<Self> {
        WriteOp::ALL
            .iter()
            .map(|op| Self::new(factory.clone(), *op))
            .collect()
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        self.op.tool_name()
    }

    fn description(&self) -> &str {
        self.op.description()
    }

    fn parameters_schema(&self) -> Value {
        self.op.schema()
    }

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let call = Call::parse(self.op, &arguments)?;
        let dry = dry_run(&arguments);
        let sandbox = self.factory.sandbox(ctx);
        let result = run_blocking(self.name(), move || call.run(&sandbox, dry)).await?;
        ToolResult::from_serialize(&result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::factory_in;

    fn tool(factory: &SandboxFactory, op: WriteOp) -> FileWriteTool {
        FileWriteTool::new(factory.clone(), op)
    }

    #[tokio::test]
    async fn edit_stages_a_pending_change() {
        let (dir, factory) = factory_in();
        std::fs::write(dir.path().join("a.py"), "def foo():\n    pass\n").unwrap();
        let ctx = ToolContext::new(dir.path());
        let out = tool(&factory, WriteOp::Edit)
            .execute(json!({"path": "a.py", "old_str": "def foo", "new_str": "def bar"}), &ctx)
            .await
            .unwrap();
        assert!(out.error_code().is_none());
        assert_eq!(out.result["success"], true);
        assert_eq!(out.result["preview"], true);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.py")).unwrap(),
            "def foo():\n    pass\n"
        );
        let change = factory.store().get_pending_change("a.py", None, None).unwrap();
        assert_eq!(change.new_content.as_deref(), Some("def bar():\n    pass\n"));
    }

    #[tokio::test]
    async fn argument_codes() {
        let (dir, factory) = factory_in();
        let ctx = ToolContext::new(dir.path());
        let cases = [
            (WriteOp::Create, json!({"path": "n.py"}), "file_text_required"),
            (WriteOp::Write, json!({"path": "n.py"}), "content_required"),
            (WriteOp::InsertLine, json!({"path": "n.py", "new_str": "x"}), "insert_line_required"),
            (WriteOp::Move, json!({"source": "a"}), "destination_required"),
            (WriteOp::Delete, json!({}), "path_required"),
        ];
        for (op, args, code) in cases {
            let err = tool(&factory, op).execute(args, &ctx).await.unwrap_err();
            assert_eq!(err.code(), code, "{}", op.tool_name());
        }
    }

    #[tokio::test]
    async fn create_then_undo_cancels() {
        let (dir, factory) = factory_in();
        let ctx = ToolContext::new(dir.path());
        let out = tool(&factory, WriteOp::Create)
            .execute(json!({"path": "n.py", "file_text": ""}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.result["success"], true);
        assert_eq!(factory.store().len(), 1);
        tool(&factory, WriteOp::Undo)
            .execute(json!({"path": "n.py"}), &ctx)
            .await
            .unwrap();
        assert!(factory.store().is_empty());
    }

    #[tokio::test]
    async fn dry_run_leaves_store_untouched() {
        let (dir, factory) = factory_in();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\n").unwrap();
        let ctx = ToolContext::new(dir.path());
        let out = tool(&factory, WriteOp::ReplaceLines)
            .execute(
                json!({"path": "a.txt", "startLine": 2, "endLine": 2, "newContent": "TWO", "dry_run": true}),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(out.result["dryRun"], true);
        assert!(factory.store().is_empty());
    }

    #[test]
    fn every_op_has_a_distinct_name_and_schema() {
        let names: std::collections::HashSet<_> = WriteOp::ALL.iter().map(|op| op.tool_name()).collect();
        assert_eq!(names.len(), WriteOp::ALL.len());
        assert!(WriteOp::Edit.schema()["properties"]["dry_run"].is_object());
        assert!(WriteOp::Undo.schema()["properties"]["dry_run"].is_null());
    }
}
