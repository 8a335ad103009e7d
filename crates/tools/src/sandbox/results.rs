//! Structured results returned by sandbox operations.
//!
//! These serialize (camelCase) straight into the `result` field of a tool
//! observation. Failures never surface as Rust errors: every result carries
//! an `error` code instead, `null` on success.

use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListFilesResult {
    pub files: Vec<String>,
    pub truncated: bool,
    pub error: Option<String>,
}

impl ListFilesResult {
    pub fn fail(code: impl Into<String>) -> Self {
        Self {
            files: Vec::new(),
            truncated: false,
            error: Some(code.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GrepMatch {
    pub file_path: String,
    pub line_number: usize,
    pub line_content: String,
    pub before: Vec<String>,
    pub after: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GrepResult {
    pub matches: Vec<GrepMatch>,
    pub files_searched: usize,
    pub truncated: bool,
    pub error: Option<String>,
}

impl GrepResult {
    pub fn fail(code: impl Into<String>) -> Self {
        Self {
            error: Some(code.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReadFileResult {
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub truncated: bool,
    pub content: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileViewResult {
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub total_lines: usize,
    pub window: usize,
    pub has_more_above: bool,
    pub has_more_below: bool,
    pub truncated: bool,
    pub content: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FileSearchHit {
    pub line: usize,
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileSearchResult {
    pub file_path: String,
    /// Matching lines seen, including ones past the hit limit.
    pub matches: usize,
    /// Hits actually returned.
    pub lines: usize,
    pub hits: Vec<FileSearchHit>,
    pub truncated: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RepoMapResult {
    pub content: String,
    pub truncated: bool,
    pub total_files: usize,
    pub error: Option<String>,
}

impl RepoMapResult {
    pub fn fail(code: impl Into<String>) -> Self {
        Self {
            error: Some(code.into()),
            ..Self::default()
        }
    }
}

/// Outcome of a single-file mutation.
///
/// `preview` is true when nothing touched disk: the change was staged, or
/// the call was a dry run.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EditFileResult {
    pub file_path: String,
    pub success: bool,
    pub error: Option<String>,
    pub preview: bool,
    pub dry_run: bool,
    pub old_content: Option<String>,
    pub new_content: Option<String>,
}

impl EditFileResult {
    pub fn ok(
        file_path: impl Into<String>,
        preview: bool,
        old_content: Option<String>,
        new_content: Option<String>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            success: true,
            error: None,
            preview,
            dry_run: false,
            old_content,
            new_content,
        }
    }

    pub fn fail(file_path: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            success: false,
            error: Some(code.into()),
            ..Self::default()
        }
    }

    pub fn dry(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        if dry_run {
            self.preview = true;
        }
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatchFileResult {
    pub file_path: String,
    pub success: bool,
    pub error: Option<String>,
    pub created: bool,
    pub deleted: bool,
    pub lines_added: usize,
    pub lines_removed: usize,
    pub old_content: Option<String>,
    pub new_content: Option<String>,
}

impl PatchFileResult {
    pub fn fail(file_path: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            error: Some(code.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatchApplyResult {
    pub success: bool,
    pub error: Option<String>,
    pub files: usize,
    pub files_applied: usize,
    pub lines_added: usize,
    pub lines_removed: usize,
    pub results: Vec<PatchFileResult>,
    pub summary: String,
    pub preview: bool,
}

impl PatchApplyResult {
    pub fn fail(code: impl Into<String>, preview: bool) -> Self {
        Self {
            error: Some(code.into()),
            preview,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchReplaceItem {
    pub file_path: String,
    pub replacements: usize,
    pub before_lines: usize,
    pub after_lines: usize,
    pub error: Option<String>,
    pub old_content: Option<String>,
    pub new_content: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchReplaceResult {
    pub success: bool,
    pub error: Option<String>,
    pub files_scanned: usize,
    pub files_changed: usize,
    pub replacements: usize,
    pub truncated: bool,
    pub items: Vec<BatchReplaceItem>,
    pub summary: String,
    pub preview: bool,
}

impl BatchReplaceResult {
    pub fn fail(code: impl Into<String>, preview: bool) -> Self {
        Self {
            error: Some(code.into()),
            preview,
            ..Self::default()
        }
    }
}
