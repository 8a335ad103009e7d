//! Long-lived context files read once per run.
//!
//! Project memory, long-term memory and agent instructions live at fixed
//! workspace-relative paths and are read through the sandbox overlay. The
//! IDE snapshot is supplied externally and may sit outside the workspace.

use codeagent_core::text::truncate;
use codeagent_tools::Sandbox;
use codeagent_tools::sandbox::MapOptions;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

pub const MAX_PROJECT_MEMORY_CHARS: usize = 6000;
pub const MAX_LONG_TERM_MEMORY_CHARS: usize = 8000;
pub const MAX_IDE_CONTEXT_CHARS: usize = 6000;

const PROJECT_MEMORY_FILES: &[&str] = &["CLAUDE.md", "CLAUDE.local.md"];
const LONG_TERM_MEMORY_FILES: &[&str] = &[
    "LONG_TERM_MEMORY.md",
    "LONG_TERM_MEMORY.local.md",
    ".codeagent/long_term_memory.md",
];
const AGENTS_FILE: &str = "AGENTS.md";

pub const FOCUSED_VIEW_HEADER: &str = "Project Structure (Focused View):";

static KEYWORD_SPLIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"[\s,;?!."]+"#).expect("static regex"));

/// The loaded context. Empty strings mean "nothing found".
#[derive(Debug, Clone, Default)]
pub struct ContextFiles {
    pub project_memory: String,
    pub long_term_memory: String,
    pub agents_md: String,
    /// Filtered snapshot, ready for the prompt.
    pub ide_context: String,
    pub ide_path: Option<PathBuf>,
}

fn first_lines(content: &str, max_lines: usize) -> String {
    content.lines().take(max_lines).collect::<Vec<_>>().join("\n")
}

/// `[name]\ncontent` blocks for every candidate that exists and is non-empty.
fn load_group(sandbox: &Sandbox, names: &[&str], max_lines: usize, max_chars: usize) -> String {
    let mut blocks = Vec::new();
    for name in names {
        match sandbox.read_text(name) {
            Ok(content) => {
                let content = first_lines(&content, max_lines);
                let content = truncate(content.trim(), max_chars);
                if !content.is_empty() {
                    info!(file = %name, "Context file loaded");
                    blocks.push(format!("[{name}]\n{content}"));
                }
            }
            Err(code) => debug!(file = %name, code = %code, "Context file skipped"),
        }
    }
    blocks.join("\n\n")
}

impl ContextFiles {
    /// Read every context file. Missing files are not errors.
    pub fn load(sandbox: &Sandbox, ide_path: Option<&Path>, goal: &str) -> Self {
        let project_memory = load_group(sandbox, PROJECT_MEMORY_FILES, 400, MAX_PROJECT_MEMORY_CHARS);
        let long_term_memory = load_group(sandbox, LONG_TERM_MEMORY_FILES, 600, MAX_LONG_TERM_MEMORY_CHARS);
        let agents_md = match sandbox.read_text(AGENTS_FILE) {
            Ok(content) => truncate(first_lines(&content, 600).trim(), MAX_LONG_TERM_MEMORY_CHARS).to_string(),
            Err(_) => String::new(),
        };
        let ide_context = ide_path
            .map(|path| filter_ide_context(&read_ide_snapshot(sandbox, path), goal))
            .unwrap_or_default();
        Self {
            project_memory,
            long_term_memory,
            agents_md,
            ide_context,
            ide_path: ide_path.map(Path::to_path_buf),
        }
    }

    /// Re-read the snapshot after the workspace changed: from the IDE file
    /// when one was supplied, else a focused structure map of the workspace.
    pub fn refresh_ide_context(&mut self, sandbox: &Sandbox, goal: &str) {
        let snapshot = match &self.ide_path {
            Some(path) => read_ide_snapshot(sandbox, path),
            None => {
                let map = sandbox.structure_map(
                    ".",
                    &MapOptions {
                        max_depth: Some(4),
                        max_files: Some(200),
                        max_chars: Some(MAX_IDE_CONTEXT_CHARS as i64),
                        focus: Vec::new(),
                    },
                );
                match map.error {
                    Some(code) => {
                        warn!(code = %code, "Structure refresh failed");
                        return;
                    }
                    None => format!("{FOCUSED_VIEW_HEADER}\n{}", map.content),
                }
            }
        };
        self.ide_context = filter_ide_context(&snapshot, goal);
        debug!(chars = self.ide_context.chars().count(), "IDE context refreshed");
    }
}

/// First 800 lines of the snapshot. Relative paths go through the sandbox;
/// absolute ones are read from disk as-is.
fn read_ide_snapshot(sandbox: &Sandbox, path: &Path) -> String {
    let content = if path.is_absolute() {
        std::fs::read_to_string(path).map_err(|e| e.to_string())
    } else {
        sandbox.read_text(&path.to_string_lossy())
    };
    match content {
        Ok(content) => first_lines(&content, 800),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "IDE context unreadable");
            String::new()
        }
    }
}

fn goal_keywords(goal: &str) -> HashSet<String> {
    KEYWORD_SPLIT
        .split(goal)
        .filter(|w| w.chars().count() > 3)
        .map(str::to_lowercase)
        .collect()
}

/// Keep only the parts of an IDE snapshot that relate to the goal.
///
/// Inside `ClassStructure:` every `- Class` line is kept as an index, and
/// `* method` lines survive when their class or the method itself matches
/// a goal keyword. Inside `CallGraph:` only matching lines survive. Other
/// sections pass through. A focused view is never filtered.
pub fn filter_ide_context(context: &str, goal: &str) -> String {
    if context.is_empty() {
        return String::new();
    }
    if context.starts_with(FOCUSED_VIEW_HEADER) {
        return truncate(context, MAX_IDE_CONTEXT_CHARS).to_string();
    }
    let keywords = goal_keywords(goal);
    if keywords.is_empty() {
        return truncate(context, MAX_IDE_CONTEXT_CHARS).to_string();
    }
    let matches = |text: &str| {
        let lower = text.to_lowercase();
        keywords.iter().any(|k| lower.contains(k.as_str()))
    };

    #[derive(PartialEq)]
    enum Section {
        Other,
        Classes,
        Calls,
    }
    let mut section = Section::Other;
    let mut class_matched = false;
    let mut out = String::new();
    for line in context.split('\n') {
        let trimmed = line.trim();
        let keep = match trimmed {
            "ClassStructure:" => {
                section = Section::Classes;
                true
            }
            "CallGraph:" => {
                section = Section::Calls;
                true
            }
            _ => match section {
                Section::Classes => {
                    if let Some(class) = trimmed.strip_prefix("- ") {
                        class_matched = matches(class);
                        true
                    } else if let Some(method) = trimmed.strip_prefix("* ") {
                        class_matched || matches(method)
                    } else {
                        true
                    }
                }
                Section::Calls => matches(trimmed),
                Section::Other => true,
            },
        };
        if keep {
            out.push_str(line);
            out.push('\n');
        }
    }
    truncate(&out, MAX_IDE_CONTEXT_CHARS).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeagent_config::SandboxConfig;
    use codeagent_tools::{PendingChangeStore, SandboxFactory};
    use std::sync::Arc;

    const SNAPSHOT: &str = "Project: demo\nClassStructure:\n- UserService\n  * login()\n  * logout()\n- OrderService\n  * placeOrder()\n  * cancelLogin()\nCallGraph:\nUserService.login -> TokenStore.issue\nOrderService.placeOrder -> Db.save\n";

    fn sandbox_in(dir: &tempfile::TempDir) -> Sandbox {
        SandboxFactory::new(Arc::new(PendingChangeStore::new()), SandboxConfig::default()).for_root(dir.path(), None)
    }

    #[test]
    fn filters_classes_methods_and_calls() {
        let filtered = filter_ide_context(SNAPSHOT, "Why does login fail for users?");
        assert!(filtered.contains("- UserService\n  * login()\n  * logout()\n"));
        assert!(filtered.contains("- OrderService\n  * cancelLogin()\n"));
        assert!(!filtered.contains("placeOrder()"));
        assert!(filtered.contains("UserService.login -> TokenStore.issue"));
        assert!(!filtered.contains("Db.save"));
        assert!(filtered.starts_with("Project: demo\n"));
    }

    #[test]
    fn focused_view_and_short_goals_pass_through() {
        let focused = format!("{FOCUSED_VIEW_HEADER}\nsrc/\n  a.rs\n");
        assert_eq!(filter_ide_context(&focused, "login flow"), focused);
        assert_eq!(filter_ide_context(SNAPSHOT, "fix it now"), SNAPSHOT);
        assert_eq!(filter_ide_context("", "anything"), "");
    }

    #[test]
    fn keywords_split_on_punctuation() {
        let keywords = goal_keywords("Rename \"parseLine\", then run tests.");
        assert!(keywords.contains("parseline"));
        assert!(keywords.contains("rename"));
        assert!(keywords.contains("tests"));
        assert!(!keywords.contains("run"));
    }

    #[test]
    fn loads_memory_groups() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("CLAUDE.md"), "Use tabs.\n").unwrap();
        std::fs::write(dir.path().join("CLAUDE.local.md"), "  \n").unwrap();
        std::fs::create_dir_all(dir.path().join(".codeagent")).unwrap();
        std::fs::write(dir.path().join(".codeagent/long_term_memory.md"), "Prefer small diffs").unwrap();
        std::fs::write(dir.path().join("AGENTS.md"), "Run cargo fmt").unwrap();

        let files = ContextFiles::load(&sandbox_in(&dir), None, "goal");
        assert_eq!(files.project_memory, "[CLAUDE.md]\nUse tabs.");
        assert_eq!(files.long_term_memory, "[.codeagent/long_term_memory.md]\nPrefer small diffs");
        assert_eq!(files.agents_md, "Run cargo fmt");
        assert!(files.ide_context.is_empty());
    }

    #[test]
    fn ide_snapshot_is_read_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ide.txt"), SNAPSHOT).unwrap();
        let files = ContextFiles::load(&sandbox_in(&dir), Some(Path::new("ide.txt")), "explain the login path");
        assert!(files.ide_context.contains("* login()"));
        assert!(!files.ide_context.contains("Db.save"));
    }

    #[test]
    fn refresh_without_ide_file_builds_a_focused_view() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "fn main() {}\n").unwrap();
        let sandbox = sandbox_in(&dir);
        let mut files = ContextFiles::default();
        files.refresh_ide_context(&sandbox, "anything");
        assert!(files.ide_context.starts_with(FOCUSED_VIEW_HEADER));
        assert!(files.ide_context.contains("main.rs"));
    }
}
