//! Unified diff parsing and application.

use super::Sandbox;
use super::results::{PatchApplyResult, PatchFileResult};
use crate::pending::ChangeType;
use codeagent_core::text::{collapse_whitespace, split_lines};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

static HUNK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@\s+-(\d+)(?:,(\d+))?\s+\+(\d+)(?:,(\d+))?\s+@@.*$").expect("static regex")
});

/// One `@@` block. `lines` keep their leading ` `, `-` or `+`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    pub lines: Vec<String>,
}

/// The hunks for one file. A missing old path is a create, a missing new
/// path a delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffFile {
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub hunks: Vec<Hunk>,
}

impl DiffFile {
    pub fn is_create(&self) -> bool {
        self.old_path.is_none() && self.new_path.is_some()
    }

    pub fn is_delete(&self) -> bool {
        self.new_path.is_none() && self.old_path.is_some()
    }

    /// Path the change applies to.
    pub fn target(&self) -> Option<&str> {
        if self.is_delete() {
            self.old_path.as_deref()
        } else {
            self.new_path.as_deref()
        }
    }
}

/// `a/src/x.py\t2024-01-01` -> `Some("src/x.py")`; `/dev/null` -> `None`.
fn header_path(raw: &str) -> Option<String> {
    let path = raw.trim().split(['\t', ' ']).next().unwrap_or_default();
    if path.is_empty() || path == "/dev/null" || path == "dev/null" {
        return None;
    }
    let path = path
        .strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path);
    Some(path.to_string())
}

#[derive(Default)]
struct DiffBuilder {
    files: Vec<DiffFile>,
    current: Option<DiffFile>,
    /// Current file was opened by `diff --git` and has not seen `---` yet.
    awaiting_headers: bool,
    hunk: Option<Hunk>,
    /// Hunk lines that came from blank diff lines at the hunk's tail.
    trailing_blank: usize,
    /// Old and new lines the current `@@` header still promises.
    old_left: usize,
    new_left: usize,
}

impl DiffBuilder {
    fn close_hunk(&mut self) {
        if let Some(mut hunk) = self.hunk.take() {
            let keep = hunk.lines.len() - self.trailing_blank;
            hunk.lines.truncate(keep);
            self.current.get_or_insert_with(DiffFile::default).hunks.push(hunk);
        }
        self.trailing_blank = 0;
    }

    fn close_file(&mut self) {
        self.close_hunk();
        if let Some(file) = self.current.take() {
            self.files.push(file);
        }
        self.awaiting_headers = false;
    }

    fn push_line(&mut self, line: String, blank: bool) {
        if let Some(hunk) = self.hunk.as_mut() {
            match line.as_bytes().first() {
                Some(b'-') => self.old_left = self.old_left.saturating_sub(1),
                Some(b'+') => self.new_left = self.new_left.saturating_sub(1),
                _ => {
                    self.old_left = self.old_left.saturating_sub(1);
                    self.new_left = self.new_left.saturating_sub(1);
                }
            }
            hunk.lines.push(line);
            self.trailing_blank = if blank { self.trailing_blank + 1 } else { 0 };
        }
    }

    /// Inside a hunk whose header counts are not used up yet.
    fn expects_body(&self) -> bool {
        self.hunk.is_some() && (self.old_left > 0 || self.new_left > 0)
    }
}

/// Parse a (possibly multi-file) unified diff. Files without hunks are
/// dropped. While a hunk's header counts are not used up, `---`/`+++`
/// lines are body lines; past them the body runs until the next header,
/// so diffs with understated counts still parse.
pub fn parse_unified_diff(diff: &str) -> Vec<DiffFile> {
    let lines: Vec<&str> = diff.lines().collect();
    let mut b = DiffBuilder::default();

    for (idx, line) in lines.iter().enumerate() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            b.close_file();
            let parts: Vec<&str> = rest.split_whitespace().collect();
            b.current = Some(DiffFile {
                old_path: parts.first().and_then(|p| header_path(p)),
                new_path: parts.get(1).and_then(|p| header_path(p)),
                hunks: Vec::new(),
            });
            b.awaiting_headers = true;
            continue;
        }

        let next_is_plus = lines.get(idx + 1).is_some_and(|n| n.starts_with("+++ "));
        if b.expects_body() && line.starts_with(['-', '+']) {
            // overstated counts: a full file header still wins
            let file_header =
                line.starts_with("--- ") && next_is_plus && lines.get(idx + 2).is_some_and(|n| HUNK_HEADER.is_match(n));
            if !file_header {
                b.push_line(line.to_string(), false);
                continue;
            }
        }
        if let Some(rest) = line.strip_prefix("--- ")
            && next_is_plus
        {
            if b.awaiting_headers {
                b.close_hunk();
                b.awaiting_headers = false;
            } else {
                b.close_file();
                b.current = Some(DiffFile::default());
            }
            if let Some(file) = b.current.as_mut() {
                file.old_path = header_path(rest);
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("+++ ")
            && b.hunk.is_none()
        {
            if let Some(file) = b.current.as_mut() {
                file.new_path = header_path(rest);
            }
            continue;
        }

        if let Some(caps) = HUNK_HEADER.captures(line) {
            b.close_hunk();
            let num = |i: usize, default: usize| {
                caps.get(i)
                    .and_then(|m| m.as_str().parse().ok())
                    .unwrap_or(default)
            };
            let hunk = Hunk {
                old_start: num(1, 0),
                old_count: num(2, 1),
                new_start: num(3, 0),
                new_count: num(4, 1),
                lines: Vec::new(),
            };
            b.old_left = hunk.old_count;
            b.new_left = hunk.new_count;
            b.hunk = Some(hunk);
            continue;
        }

        if b.hunk.is_none() || line.starts_with('\\') {
            continue;
        }
        if line.is_empty() {
            b.push_line(" ".into(), true);
        } else if line.starts_with([' ', '-', '+']) {
            b.push_line(line.to_string(), false);
        } else {
            b.close_hunk();
        }
    }
    b.close_file();

    b.files.retain(|f| !f.hunks.is_empty());
    b.files
}

fn lines_match(actual: &str, expected: &str) -> bool {
    actual == expected || collapse_whitespace(actual) == collapse_whitespace(expected)
}

/// Apply `hunks` to `content`. Context and removed lines must match
/// (modulo whitespace). Returns the new text with added/removed counts.
pub fn apply_hunks(content: &str, hunks: &[Hunk]) -> Result<(String, usize, usize), String> {
    let old_lines = split_lines(content);
    let mut out: Vec<&str> = Vec::with_capacity(old_lines.len());
    let mut cursor = 0;
    let mut added = 0;
    let mut removed = 0;

    for hunk in hunks {
        let target = hunk.old_start.saturating_sub(1);
        while cursor < target && cursor < old_lines.len() {
            out.push(old_lines[cursor]);
            cursor += 1;
        }
        for line in &hunk.lines {
            let (tag, text) = line.split_at(1);
            match tag {
                " " => {
                    if cursor >= old_lines.len() || !lines_match(old_lines[cursor], text) {
                        return Err("context_mismatch".into());
                    }
                    out.push(old_lines[cursor]);
                    cursor += 1;
                }
                "-" => {
                    if cursor >= old_lines.len() || !lines_match(old_lines[cursor], text) {
                        return Err("delete_mismatch".into());
                    }
                    cursor += 1;
                    removed += 1;
                }
                _ => {
                    out.push(text);
                    added += 1;
                }
            }
        }
    }
    out.extend_from_slice(&old_lines[cursor.min(old_lines.len())..]);
    Ok((out.join("\n"), added, removed))
}

impl Sandbox {
    /// Apply a unified diff file by file. A file whose hunks do not match
    /// leaves the overlay untouched; other files still go through.
    pub fn apply_patch(&self, diff: &str, dry_run: bool) -> PatchApplyResult {
        let preview = dry_run || self.is_staged();
        if diff.trim().is_empty() {
            return PatchApplyResult::fail("diff_required", preview);
        }
        let files = parse_unified_diff(diff);
        if files.is_empty() {
            return PatchApplyResult::fail("diff_parse_failed", preview);
        }

        let results: Vec<PatchFileResult> = files.iter().map(|f| self.apply_diff_file(f, dry_run)).collect();
        let applied = results.iter().filter(|r| r.success).count();
        let lines_added = results.iter().map(|r| r.lines_added).sum();
        let lines_removed = results.iter().map(|r| r.lines_removed).sum();
        let success = applied == results.len();
        debug!(files = results.len(), applied, "Patch processed");

        PatchApplyResult {
            success,
            error: (!success).then(|| "partial_failure".to_string()),
            files: results.len(),
            files_applied: applied,
            lines_added,
            lines_removed,
            summary: format!(
                "files={} applied={applied} added={lines_added} removed={lines_removed} preview={preview}",
                results.len()
            ),
            results,
            preview,
        }
    }

    fn apply_diff_file(&self, file: &DiffFile, dry_run: bool) -> PatchFileResult {
        let Some(raw) = file.target() else {
            return PatchFileResult::fail("", "path_missing");
        };
        let Some(abs) = self.resolve(raw) else {
            return PatchFileResult::fail(raw, "path_outside_workspace");
        };
        let rel = self.rel(&abs);
        let exists = self.overlay_exists(&abs);

        if file.is_delete() {
            if !exists {
                return PatchFileResult::fail(rel, "path_not_found");
            }
            if self.overlay_is_binary(&abs) {
                return PatchFileResult::fail(rel, "file_is_binary");
            }
            let content = match self.overlay_content(&abs) {
                Ok(text) => text,
                Err(code) => return PatchFileResult::fail(rel, code),
            };
            if self.too_large(&content) {
                return PatchFileResult::fail(rel, "file_too_large");
            }
            if !dry_run && let Err(code) = self.submit_change(&rel, ChangeType::Delete, Some(content.clone()), None) {
                return PatchFileResult::fail(rel, code);
            }
            return PatchFileResult {
                file_path: rel,
                success: true,
                deleted: true,
                lines_removed: content.lines().count(),
                old_content: Some(content),
                ..PatchFileResult::default()
            };
        }

        if !exists && !file.is_create() {
            return PatchFileResult::fail(rel, "file_not_found");
        }
        let old = if exists {
            if self.overlay_is_binary(&abs) {
                return PatchFileResult::fail(rel, "file_is_binary");
            }
            match self.overlay_content(&abs) {
                Ok(text) => Some(text),
                Err(code) => return PatchFileResult::fail(rel, code),
            }
        } else {
            None
        };
        let base = if file.is_create() { "" } else { old.as_deref().unwrap_or_default() };

        let (updated, added, removed) = match apply_hunks(base, &file.hunks) {
            Ok(applied) => applied,
            Err(code) => return PatchFileResult::fail(rel, code),
        };
        if self.too_large(&updated) {
            return PatchFileResult::fail(rel, "file_too_large");
        }
        let change_type = if old.is_some() { ChangeType::Edit } else { ChangeType::Create };
        if !dry_run
            && let Err(code) = self.submit_change(&rel, change_type, old.clone(), Some(updated.clone()))
        {
            return PatchFileResult::fail(rel, code);
        }
        PatchFileResult {
            file_path: rel,
            success: true,
            error: None,
            created: old.is_none(),
            deleted: false,
            lines_added: added,
            lines_removed: removed,
            old_content: old,
            new_content: Some(updated),
        }
    }
}
