//! Human-readable rendering of tool observations for the prompt.
//!
//! Raw envelopes are noisy JSON; the model reads these renderings instead.
//! The compact form goes into the history tail, the full form into the
//! pinned slot.

use codeagent_core::observation::{Field, is_error_value};
use codeagent_core::text::{truncate, truncate_with};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detail {
    Compact,
    Full,
}

impl Detail {
    fn pick(self, compact: usize, full: usize) -> usize {
        match self {
            Detail::Compact => compact,
            Detail::Full => full,
        }
    }
}

const EDIT_TOOLS: &[&str] = &[
    "EDIT_FILE",
    "CREATE_FILE",
    "WRITE_FILE",
    "INSERT_LINE",
    "REPLACE_LINES",
    "DELETE_FILE",
    "UNDO_EDIT",
    "MOVE_PATH",
    "CREATE_DIRECTORY",
    "APPLY_PATCH",
    "BATCH_REPLACE",
];

fn fenced(body: &str) -> String {
    format!("```\n{}\n```", body.trim_end())
}

fn array<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    Field::of(value, key)
        .value()
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn more_line(total: usize, shown: usize) -> String {
    if total > shown {
        format!("\n- ... ({} more)", total - shown)
    } else {
        String::new()
    }
}

/// Render one observation string. Unparsable text is passed through,
/// shortened in compact mode.
pub fn render_observation(raw: &str, detail: Detail) -> String {
    let Ok(obs) = serde_json::from_str::<Value>(raw) else {
        return match detail {
            Detail::Compact => truncate_with(raw, 500, "..."),
            Detail::Full => raw.to_string(),
        };
    };
    let tool = Field::of(&obs, "tool").text();
    let mut out = render_value(&tool, &obs, detail);
    if Field::of(&obs, "cached").as_bool() == Some(true) {
        out = format!("(cached) {out}");
    }
    if let Some(hint) = Field::of(&obs, "hint").non_empty_str() {
        out.push_str(&format!("\nHint: {hint}"));
    }
    out
}

fn render_value(tool: &str, obs: &Value, detail: Detail) -> String {
    let result = Field::of(obs, "result").value().unwrap_or(&Value::Null);
    let args = Field::of(obs, "args").value().unwrap_or(&Value::Null);

    if EDIT_TOOLS.contains(&tool) {
        return render_edit(tool, obs, result, args);
    }
    if tool == "APPLY_PENDING_DIFF" {
        let applied = array(obs, "applied").len();
        if is_error_value(obs) {
            let code = error_code(obs, result);
            return format!("Tool Output (APPLY_PENDING_DIFF): Error: {code}");
        }
        let verb = if Field::of(result, "rejected").as_bool() == Some(true) {
            "Rejected"
        } else {
            "Applied"
        };
        return format!("Tool Output (APPLY_PENDING_DIFF): {verb} pending changes ({applied} files)");
    }
    if is_error_value(obs) {
        return format!("Tool Output ({tool}): Error: {}", error_code(obs, result));
    }

    match tool {
        "READ_FILE" | "OPEN_FILE_VIEW" => {
            let path = Field::of(result, "filePath").text();
            let start = Field::of(result, "startLine").text();
            let end = Field::of(result, "endLine").text();
            let content = Field::of(result, "content").text();
            let body = match detail {
                Detail::Compact => truncate_with(&content, 500, "\n..."),
                Detail::Full => content,
            };
            format!("Tool Output ({tool} {path} lines {start}-{end}):\n{}", fenced(&body))
        }
        "REPO_MAP" | "STRUCTURE_MAP" => {
            let content = Field::of(result, "content").text();
            let body = match detail {
                Detail::Compact => truncate_with(&content, 1500, "\n..."),
                Detail::Full => content,
            };
            format!("Tool Output ({tool}):\n{}", fenced(&body))
        }
        "LIST_FILES" => {
            let files = array(result, "files");
            let limit = detail.pick(10, 200);
            let lines: Vec<String> = files
                .iter()
                .take(limit)
                .map(|f| format!("- {}", f.as_str().unwrap_or_default()))
                .collect();
            format!(
                "Tool Output (LIST_FILES): {} files\n{}{}",
                files.len(),
                lines.join("\n"),
                more_line(files.len(), lines.len())
            )
        }
        "GREP" => {
            let matches = array(result, "matches");
            let limit = detail.pick(5, 50);
            let lines: Vec<String> = matches
                .iter()
                .take(limit)
                .map(|m| {
                    format!(
                        "- {}:{} {}",
                        Field::of(m, "filePath").text(),
                        Field::of(m, "lineNumber").text(),
                        Field::of(m, "lineContent").text().trim()
                    )
                })
                .collect();
            format!(
                "Tool Output (GREP): {} matches\n{}{}",
                matches.len(),
                lines.join("\n"),
                more_line(matches.len(), lines.len())
            )
        }
        "SEARCH_KNOWLEDGE" => {
            let hits = array(result, "hits");
            let limit = detail.pick(3, 20);
            let mut lines = Vec::new();
            for hit in hits.iter().take(limit) {
                let mut line = format!(
                    "- {}:{}-{}",
                    Field::of(hit, "filePath").text(),
                    Field::of(hit, "startLine").text(),
                    Field::of(hit, "endLine").text()
                );
                if let Some(name) = Field::of(hit, "symbolName").non_empty_str() {
                    line.push_str(&format!(" {}:{name}", Field::of(hit, "symbolKind").text()));
                }
                if detail == Detail::Full {
                    let snippet = Field::of(hit, "snippet").text();
                    if !snippet.trim().is_empty() {
                        line.push('\n');
                        line.push_str(&fenced(truncate(&snippet, 800)));
                    }
                }
                lines.push(line);
            }
            format!(
                "Tool Output (SEARCH_KNOWLEDGE): {} hits\n{}{}",
                hits.len(),
                lines.join("\n"),
                more_line(hits.len(), lines.len())
            )
        }
        _ => {
            let text = result.to_string();
            let body = match detail {
                Detail::Compact => truncate_with(&text, 500, "..."),
                Detail::Full => text,
            };
            format!("Tool Output ({tool}):\n{body}")
        }
    }
}

fn error_code(obs: &Value, result: &Value) -> String {
    Field::of(obs, "error")
        .non_empty_str()
        .or_else(|| Field::of(result, "error").non_empty_str())
        .unwrap_or("failed")
        .to_string()
}

fn render_edit(tool: &str, obs: &Value, result: &Value, args: &Value) -> String {
    let path = Field::of(result, "filePath")
        .non_empty_str()
        .or_else(|| Field::first_of(args, &["path", "file_path", "filePath"]).non_empty_str());
    let label = match path {
        Some(path) => format!("{tool} {path}"),
        None => tool.to_string(),
    };
    if is_error_value(obs) {
        return format!("Tool Output ({label}): Error: {}", error_code(obs, result));
    }
    let status = if Field::of(result, "preview").as_bool() == Some(true)
        || Field::of(result, "staged").as_bool() == Some(true)
    {
        "Preview staged (pending apply)"
    } else {
        "Applied"
    };
    format!("Tool Output ({label}): {status}")
}
