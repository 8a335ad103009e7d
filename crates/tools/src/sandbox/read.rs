//! Read-side operations: listing, grep, ranged reads and in-file search.

use super::results::*;
use super::{Sandbox, clamp_limit, compile_glob, is_binary_file, is_indexable, read_text, walk};
use codeagent_core::text::{char_len, collapse_whitespace};
use codeagent_security::relative_unix;
use globset::GlobMatcher;
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;

const DEFAULT_LIST_LIMIT: usize = 4000;
const MAX_LIST_LIMIT: usize = 20_000;
const DEFAULT_LIST_DEPTH: usize = 25;
const MAX_LIST_DEPTH: usize = 80;

const DEFAULT_GREP_MATCHES: usize = 200;
const MAX_GREP_MATCHES: usize = 2000;
const DEFAULT_GREP_FILES: usize = 200;
const MAX_GREP_FILES: usize = 2000;
const MAX_GREP_CONTEXT: i64 = 5;

const MAX_READ_CHARS_CAP: usize = 120_000;
const DEFAULT_READ_SPAN: usize = 200;
const MAX_READ_SPAN: usize = 2000;

const DEFAULT_VIEW_WINDOW: usize = 200;
const MAX_VIEW_WINDOW: usize = 2000;

const DEFAULT_SEARCH_MATCHES: usize = 200;
const MAX_SEARCH_MATCHES: usize = 2000;
const DEFAULT_SEARCH_LINES: usize = 100;
const MAX_SEARCH_LINES: usize = 500;

pub(crate) fn compile_regex(pattern: &str) -> Result<Regex, String> {
    Regex::new(pattern).map_err(|e| format!("bad_regex:{}", collapse_whitespace(&e.to_string())))
}

/// `{n}→{line}\n` rows for lines `start..=end` (1-based), stopping before
/// the row that would exceed `max_chars`. Returns the text, the last line
/// rendered, and whether the char budget cut it short.
fn render_numbered(lines: &[&str], start: usize, end: usize, max_chars: usize) -> (String, usize, bool) {
    let mut out = String::new();
    let mut used = 0;
    let mut last = start.saturating_sub(1);
    for n in start..=end {
        let Some(line) = lines.get(n - 1) else {
            break;
        };
        let row = format!("{n}→{line}\n");
        let len = char_len(&row);
        if used + len > max_chars {
            return (out, last, true);
        }
        used += len;
        out.push_str(&row);
        last = n;
    }
    (out, last, false)
}

struct GrepScan<'a> {
    regex: &'a Regex,
    context: usize,
    match_limit: usize,
    file_limit: usize,
    matches: Vec<GrepMatch>,
    files_searched: usize,
}

impl GrepScan<'_> {
    fn exhausted(&self) -> bool {
        self.matches.len() >= self.match_limit || self.files_searched >= self.file_limit
    }

    fn scan(&mut self, rel: &str, content: &str) {
        self.files_searched += 1;
        let lines: Vec<&str> = content.lines().collect();
        for (idx, line) in lines.iter().enumerate() {
            if self.matches.len() >= self.match_limit {
                break;
            }
            if !self.regex.is_match(line) {
                continue;
            }
            let from = idx.saturating_sub(self.context);
            let to = (idx + 1 + self.context).min(lines.len());
            self.matches.push(GrepMatch {
                file_path: rel.to_string(),
                line_number: idx + 1,
                line_content: line.to_string(),
                before: lines[from..idx].iter().map(|s| s.to_string()).collect(),
                after: lines[idx + 1..to].iter().map(|s| s.to_string()).collect(),
            });
        }
    }
}

impl Sandbox {
    /// Indexable files under `path` matching `glob`, as seen through the
    /// overlay. Paths are workspace-relative and sorted.
    pub fn list_files(
        &self,
        path: &str,
        glob: Option<&str>,
        max_results: Option<i64>,
        max_depth: Option<i64>,
    ) -> ListFilesResult {
        let limit = clamp_limit(max_results, DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT);
        let depth = clamp_limit(max_depth, DEFAULT_LIST_DEPTH, MAX_LIST_DEPTH);
        let Some(dir) = self.resolve(path) else {
            return ListFilesResult::fail("path_outside_workspace");
        };
        if !dir.is_dir() {
            return ListFilesResult::fail("path_not_a_directory");
        }
        let pattern = glob.map(str::trim).filter(|g| !g.is_empty()).unwrap_or("**/*");
        let matcher = match compile_glob(pattern) {
            Ok(m) => m,
            Err(code) => return ListFilesResult::fail(code),
        };

        let mut files = Vec::new();
        let mut seen = HashSet::new();
        let mut truncated = false;

        // A directory at `depth` still has its files listed.
        for entry in walk(&dir, Some(depth + 1)) {
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let Some(local) = relative_unix(&dir, entry.path()) else {
                continue;
            };
            if !matcher.is_match(&local) || !is_indexable(&local) || !self.overlay_exists(entry.path()) {
                continue;
            }
            // only a listable entry past the limit means something was cut
            if files.len() >= limit {
                truncated = true;
                break;
            }
            let rel = self.rel(entry.path());
            seen.insert(rel.clone());
            files.push(rel);
        }

        for change in self.pending_changes() {
            if change.is_delete() || seen.contains(&change.path) {
                continue;
            }
            let Some(local) = self.local_under(&dir, &change.path) else {
                continue;
            };
            if local.split('/').count() > depth + 1 || !matcher.is_match(&local) || !is_indexable(&local) {
                continue;
            }
            if files.len() >= limit {
                truncated = true;
                break;
            }
            seen.insert(change.path.clone());
            files.push(change.path);
        }

        files.sort();
        ListFilesResult {
            files,
            truncated,
            error: None,
        }
    }

    /// Regex search across indexable files under `root`. Staged content is
    /// searched instead of the disk copy.
    pub fn grep(
        &self,
        pattern: &str,
        root: &str,
        file_glob: Option<&str>,
        max_matches: Option<i64>,
        max_files: Option<i64>,
        context_lines: Option<i64>,
    ) -> GrepResult {
        let match_limit = clamp_limit(max_matches, DEFAULT_GREP_MATCHES, MAX_GREP_MATCHES);
        let file_limit = clamp_limit(max_files, DEFAULT_GREP_FILES, MAX_GREP_FILES);
        let context = context_lines.unwrap_or(0).clamp(0, MAX_GREP_CONTEXT) as usize;

        let Some(dir) = self.resolve(root) else {
            return GrepResult::fail("root_outside_workspace");
        };
        if !dir.is_dir() {
            return GrepResult::fail("root_not_a_directory");
        }
        let regex = match compile_regex(pattern) {
            Ok(r) => r,
            Err(code) => return GrepResult::fail(code),
        };
        let matcher: Option<GlobMatcher> = match file_glob.map(str::trim).filter(|g| !g.is_empty()) {
            Some(g) => match compile_glob(g) {
                Ok(m) => Some(m),
                Err(code) => return GrepResult::fail(code),
            },
            None => None,
        };
        let wanted = |local: &str| matcher.as_ref().is_none_or(|m| m.is_match(local)) && is_indexable(local);

        let mut scan = GrepScan {
            regex: &regex,
            context,
            match_limit,
            file_limit,
            matches: Vec::new(),
            files_searched: 0,
        };
        let mut processed = HashSet::new();

        for entry in walk(&dir, None) {
            if scan.exhausted() {
                break;
            }
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let Some(local) = relative_unix(&dir, entry.path()) else {
                continue;
            };
            if !wanted(&local) || !self.overlay_exists(entry.path()) {
                continue;
            }
            let rel = self.rel(entry.path());
            processed.insert(rel.clone());
            let content = match self.pending_for(entry.path()) {
                Some(change) => change.new_content.unwrap_or_default(),
                None => {
                    if self.too_large_on_disk(entry.path()) || is_binary_file(entry.path()) {
                        continue;
                    }
                    match read_text(entry.path()) {
                        Ok(text) => text,
                        Err(_) => continue,
                    }
                }
            };
            scan.scan(&rel, &content);
        }

        for change in self.pending_changes() {
            if scan.exhausted() {
                break;
            }
            if change.is_delete() || processed.contains(&change.path) {
                continue;
            }
            let Some(local) = self.local_under(&dir, &change.path) else {
                continue;
            };
            if !wanted(&local) {
                continue;
            }
            scan.scan(&change.path, change.new_content.as_deref().unwrap_or_default());
        }

        let truncated = scan.exhausted();
        GrepResult {
            matches: scan.matches,
            files_searched: scan.files_searched,
            truncated,
            error: None,
        }
    }

    /// Line-numbered slice of a file. `end_line` defaults to 200 lines after
    /// `start_line` and never reaches further than 2000.
    pub fn read_file(
        &self,
        path: &str,
        start_line: Option<i64>,
        end_line: Option<i64>,
        max_chars: Option<i64>,
    ) -> ReadFileResult {
        let max = clamp_limit(max_chars, self.max_read_chars(), MAX_READ_CHARS_CAP);
        let start = match start_line {
            Some(v) if v > 0 => v as usize,
            _ => 1,
        };
        let end = match end_line {
            Some(v) if v > 0 => (v as usize).max(start),
            _ => start.saturating_add(DEFAULT_READ_SPAN),
        }
        .min(start.saturating_add(MAX_READ_SPAN));

        let loaded = match self.load_text(path) {
            Ok(l) => l,
            Err(code) => {
                return ReadFileResult {
                    file_path: path.to_string(),
                    start_line: start,
                    end_line: end,
                    error: Some(code),
                    ..ReadFileResult::default()
                };
            }
        };
        let lines: Vec<&str> = loaded.content.lines().collect();
        let (content, last, truncated) = render_numbered(&lines, start, end, max);
        ReadFileResult {
            file_path: loaded.rel,
            start_line: start,
            end_line: last.max(start.min(lines.len())),
            truncated,
            content,
            error: None,
        }
    }

    /// A window of `window` lines starting at `line_number`, pulled back so
    /// the window stays full near the end of the file.
    pub fn view_file(
        &self,
        path: &str,
        line_number: Option<i64>,
        window: Option<i64>,
        max_chars: Option<i64>,
    ) -> FileViewResult {
        let window = clamp_limit(window, DEFAULT_VIEW_WINDOW, MAX_VIEW_WINDOW);
        let max = clamp_limit(max_chars, self.max_read_chars(), MAX_READ_CHARS_CAP);
        let loaded = match self.load_text(path) {
            Ok(l) => l,
            Err(code) => {
                return FileViewResult {
                    file_path: path.to_string(),
                    window,
                    error: Some(code),
                    ..FileViewResult::default()
                };
            }
        };
        let lines: Vec<&str> = loaded.content.lines().collect();
        let total = lines.len();
        if total == 0 {
            return FileViewResult {
                file_path: loaded.rel,
                window,
                ..FileViewResult::default()
            };
        }

        let requested = match line_number {
            Some(v) if v > 0 => v as usize,
            _ => 1,
        };
        let mut start = requested.min(total).max(1);
        if start + window - 1 > total {
            start = (total + 1).saturating_sub(window).max(1);
        }
        let end = total.min(start + window - 1);
        let (content, last, truncated) = render_numbered(&lines, start, end, max);

        FileViewResult {
            file_path: loaded.rel,
            start_line: start,
            end_line: last,
            total_lines: total,
            window,
            has_more_above: start > 1,
            has_more_below: last < total,
            truncated,
            content,
            error: None,
        }
    }

    /// Lines of one file matching `pattern`.
    pub fn search_in_file(
        &self,
        path: &str,
        pattern: &str,
        max_matches: Option<i64>,
        max_lines: Option<i64>,
    ) -> FileSearchResult {
        let match_limit = clamp_limit(max_matches, DEFAULT_SEARCH_MATCHES, MAX_SEARCH_MATCHES);
        let line_limit = clamp_limit(max_lines, DEFAULT_SEARCH_LINES, MAX_SEARCH_LINES);
        let fail = |code: String| FileSearchResult {
            file_path: path.to_string(),
            error: Some(code),
            ..FileSearchResult::default()
        };
        let regex = match compile_regex(pattern) {
            Ok(r) => r,
            Err(code) => return fail(code),
        };
        let loaded = match self.load_text(path) {
            Ok(l) => l,
            Err(code) => return fail(code),
        };

        let mut result = FileSearchResult {
            file_path: loaded.rel.clone(),
            ..FileSearchResult::default()
        };
        for (idx, line) in loaded.content.lines().enumerate() {
            if !regex.is_match(line) {
                continue;
            }
            result.matches += 1;
            if result.hits.len() >= line_limit {
                result.truncated = true;
                break;
            }
            result.hits.push(FileSearchHit {
                line: idx + 1,
                text: line.to_string(),
            });
            if result.matches >= match_limit {
                result.truncated = true;
                break;
            }
        }
        result.lines = result.hits.len();
        result
    }

    /// `rel` (workspace-relative) expressed relative to `dir`, when it lies
    /// strictly inside it.
    pub(crate) fn local_under(&self, dir: &Path, rel: &str) -> Option<String> {
        let local = relative_unix(dir, &self.root().join(rel))?;
        if local.is_empty() { None } else { Some(local) }
    }
}
