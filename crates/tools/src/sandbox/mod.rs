//! The filesystem sandbox every file tool goes through.
//!
//! A [`Sandbox`] is bound to one workspace root and one session. Reads see
//! the *overlay*: a staged change for a path shadows the disk (a staged
//! delete hides the file, a staged create makes it visible). Writes either
//! land in the [`PendingChangeStore`] (staged mode) or go straight to disk
//! with an undo snapshot (direct mode).
//!
//! All operations are synchronous; tool wrappers run them on the blocking
//! pool. No operation ever returns a Rust error: results carry a snake_case
//! `error` code.

mod batch;
mod history;
pub mod imports;
mod patch;
mod read;
mod repo_map;
pub mod results;
mod write;

pub use history::{EditHistory, FileSnapshot};
pub use patch::{DiffFile, Hunk, parse_unified_diff};
pub use repo_map::MapOptions;
pub use results::*;

use crate::pending::{PendingChange, PendingChangeStore, workspace_key};
use codeagent_config::{SandboxConfig, WriteMode};
use codeagent_core::ToolContext;
use codeagent_security::{normalize_lexically, relative_unix, resolve_under_workspace};
use globset::{GlobBuilder, GlobMatcher};
use ignore::{DirEntry, WalkBuilder};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Directories never walked into (compared case-insensitively).
const SKIP_DIRS: &[&str] = &[
    ".git", ".idea", ".gradle", ".codeagent", "node_modules", "build", "out", "target", "dist",
    ".vs",
];

/// Extensions the text tools will index, read and search.
const INDEXABLE_EXTENSIONS: &[&str] = &[
    "java", "kt", "kts", "xml", "yml", "yaml", "properties", "gradle", "md", "txt", "sql", "json",
    "py", "js", "ts", "tsx", "jsx", "html", "css", "scss", "less", "c", "cpp", "h", "hpp", "rs",
    "go", "rb", "php", "sh", "bat", "ps1", "dockerfile", "conf", "ini", "toml",
];

const BINARY_SNIFF_BYTES: usize = 8192;

pub fn should_skip_dir(name: &str) -> bool {
    SKIP_DIRS.iter().any(|d| d.eq_ignore_ascii_case(name))
}

/// Whether `path` has an extension on the indexable list.
pub fn is_indexable(path: &str) -> bool {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    match name.rfind('.') {
        Some(idx) if idx + 1 < name.len() => {
            let ext = name[idx + 1..].to_ascii_lowercase();
            INDEXABLE_EXTENSIONS.contains(&ext.as_str())
        }
        _ => false,
    }
}

/// A NUL byte in the first 8 KiB marks a file as binary. Unreadable files
/// are not binary; the read that follows reports the real error.
pub fn is_binary_file(path: &Path) -> bool {
    let Ok(file) = std::fs::File::open(path) else {
        return false;
    };
    let mut buf = Vec::with_capacity(BINARY_SNIFF_BYTES);
    match file.take(BINARY_SNIFF_BYTES as u64).read_to_end(&mut buf) {
        Ok(_) => buf.contains(&0),
        Err(_) => false,
    }
}

/// Positive requested limit capped at `cap`, else `default`.
pub(crate) fn clamp_limit(requested: Option<i64>, default: usize, cap: usize) -> usize {
    match requested {
        Some(v) if v > 0 => usize::try_from(v).unwrap_or(cap).min(cap),
        _ => default,
    }
}

pub(crate) fn compile_glob(pattern: &str) -> Result<GlobMatcher, String> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map(|g| g.compile_matcher())
        .map_err(|e| format!("bad_glob:{e}"))
}

/// Deterministic walk that skips build and VCS directories. `max_depth`
/// counts the root as depth 0.
pub(crate) fn walk(root: &Path, max_depth: Option<usize>) -> impl Iterator<Item = DirEntry> {
    WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .max_depth(max_depth)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_some_and(|t| t.is_dir())
                || !should_skip_dir(&entry.file_name().to_string_lossy())
        })
        .build()
        .filter_map(Result::ok)
}

pub(crate) fn read_text(path: &Path) -> Result<String, String> {
    std::fs::read_to_string(path).map_err(|e| format!("io_error:{:?}", e.kind()))
}

/// One-line description of a change, stored as the pending change preview.
pub(crate) fn change_summary(old: Option<&str>, new: Option<&str>) -> String {
    let old_lines: Vec<&str> = old.map(|s| s.lines().collect()).unwrap_or_default();
    let new_lines: Vec<&str> = new.map(|s| s.lines().collect()).unwrap_or_default();
    let prefix = old_lines
        .iter()
        .zip(&new_lines)
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = old_lines[prefix..]
        .iter()
        .rev()
        .zip(new_lines[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();
    let removed = old_lines.len() - prefix - suffix;
    let added = new_lines.len() - prefix - suffix;
    format!("+{added} -{removed}")
}

/// A file loaded through the overlay with the read-side checks applied.
#[derive(Debug)]
pub(crate) struct LoadedText {
    pub rel: String,
    pub content: String,
}

/// Builds [`Sandbox`]es for tool calls. Cheap to clone; the pending store
/// and undo history are shared by every sandbox it hands out.
#[derive(Debug, Clone)]
pub struct SandboxFactory {
    store: Arc<PendingChangeStore>,
    history: Arc<EditHistory>,
    config: SandboxConfig,
}

impl SandboxFactory {
    pub fn new(store: Arc<PendingChangeStore>, config: SandboxConfig) -> Self {
        Self {
            history: Arc::new(EditHistory::new(config.max_edit_history)),
            store,
            config,
        }
    }

    pub fn store(&self) -> &Arc<PendingChangeStore> {
        &self.store
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn sandbox(&self, ctx: &ToolContext) -> Sandbox {
        self.for_root(&ctx.workspace_root, ctx.session_id.as_deref())
    }

    pub fn for_root(&self, root: &Path, session_id: Option<&str>) -> Sandbox {
        let root = normalize_lexically(root);
        Sandbox {
            root_key: workspace_key(&root.to_string_lossy()),
            root,
            session: session_id.filter(|s| !s.trim().is_empty()).map(String::from),
            store: Arc::clone(&self.store),
            history: Arc::clone(&self.history),
            config: self.config.clone(),
        }
    }
}

/// Filesystem view confined to one workspace root and session.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
    root_key: String,
    session: Option<String>,
    store: Arc<PendingChangeStore>,
    history: Arc<EditHistory>,
    config: SandboxConfig,
}

impl Sandbox {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    pub fn is_staged(&self) -> bool {
        self.config.mode == WriteMode::Staged
    }

    pub fn store(&self) -> &PendingChangeStore {
        &self.store
    }

    /// Changes staged in this sandbox's scope.
    pub fn pending_changes(&self) -> Vec<PendingChange> {
        self.store.get_changes(Some(&self.root_key), self.session())
    }

    /// Whole-file text through the overlay, with the same checks as READ_FILE.
    pub fn read_text(&self, raw: &str) -> Result<String, String> {
        self.load_text(raw).map(|loaded| loaded.content)
    }

    pub(crate) fn resolve(&self, raw: &str) -> Option<PathBuf> {
        match resolve_under_workspace(&self.root, raw) {
            Ok(p) => Some(p),
            Err(e) => {
                debug!(path = raw, error = %e, "Path rejected");
                None
            }
        }
    }

    pub(crate) fn rel(&self, abs: &Path) -> String {
        relative_unix(&self.root, abs).unwrap_or_default()
    }

    pub(crate) fn pending_for(&self, abs: &Path) -> Option<PendingChange> {
        let rel = self.rel(abs);
        if rel.is_empty() {
            return None;
        }
        self.store.get_pending_change(&rel, Some(&self.root_key), self.session())
    }

    pub(crate) fn stage(&self, change: PendingChange) {
        let change = change.scoped(Some(&self.root_key), self.session());
        self.store.add_change(change);
    }

    pub(crate) fn overlay_exists(&self, abs: &Path) -> bool {
        match self.pending_for(abs) {
            Some(change) => !change.is_delete(),
            None => abs.exists(),
        }
    }

    /// Content as the agent sees it. A staged delete reads as missing.
    pub(crate) fn overlay_content(&self, abs: &Path) -> Result<String, String> {
        match self.pending_for(abs) {
            Some(change) if change.is_delete() => Err("path_not_found".into()),
            Some(change) => Ok(change.new_content.unwrap_or_default()),
            None => read_text(abs),
        }
    }

    /// Binary check that trusts staged text over the disk.
    pub(crate) fn overlay_is_binary(&self, abs: &Path) -> bool {
        self.pending_for(abs).is_none() && is_binary_file(abs)
    }

    pub(crate) fn too_large(&self, content: &str) -> bool {
        content.len() as u64 > self.config.max_file_bytes
    }

    pub(crate) fn too_large_on_disk(&self, abs: &Path) -> bool {
        std::fs::metadata(abs).is_ok_and(|m| m.len() > self.config.max_file_bytes)
    }

    pub(crate) fn max_file_bytes(&self) -> u64 {
        self.config.max_file_bytes
    }

    pub(crate) fn max_read_chars(&self) -> usize {
        self.config.max_read_chars
    }

    pub(crate) fn history(&self) -> &EditHistory {
        &self.history
    }

    /// Load a text file through the overlay, applying the read-side checks
    /// in order: confinement, existence, whitelist, binary, size.
    pub(crate) fn load_text(&self, raw: &str) -> Result<LoadedText, String> {
        let abs = self.resolve(raw).ok_or("path_outside_workspace")?;
        let rel = self.rel(&abs);
        if let Some(change) = self.pending_for(&abs) {
            if change.is_delete() {
                return Err("not_a_file".into());
            }
            if !is_indexable(&rel) {
                return Err("file_not_whitelisted".into());
            }
            return Ok(LoadedText {
                rel,
                content: change.new_content.unwrap_or_default(),
            });
        }
        if !abs.is_file() {
            return Err("not_a_file".into());
        }
        if !is_indexable(&rel) {
            return Err("file_not_whitelisted".into());
        }
        if is_binary_file(&abs) {
            return Err("file_is_binary".into());
        }
        if self.too_large_on_disk(&abs) {
            return Err("file_too_large".into());
        }
        let content = read_text(&abs)?;
        Ok(LoadedText { rel, content })
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::pending::ChangeType;

    #[test]
    fn indexable_extensions() {
        assert!(is_indexable("src/a.py"));
        assert!(is_indexable("Cargo.TOML"));
        assert!(!is_indexable("Makefile"));
        assert!(!is_indexable("image.png"));
        assert!(!is_indexable("trailing."));
    }

    #[test]
    fn skip_dirs_case_insensitive() {
        assert!(should_skip_dir("node_modules"));
        assert!(should_skip_dir("Target"));
        assert!(!should_skip_dir("src"));
    }

    #[test]
    fn binary_detection() {
        let (dir, _) = staged();
        std::fs::write(dir.path().join("b.bin"), [1u8, 0, 2]).unwrap();
        write(&dir, "t.txt", "text");
        assert!(is_binary_file(&dir.path().join("b.bin")));
        assert!(!is_binary_file(&dir.path().join("t.txt")));
        assert!(!is_binary_file(&dir.path().join("missing")));
    }

    #[test]
    fn overlay_shadows_disk() {
        let (dir, sb) = staged();
        write(&dir, "a.py", "disk");
        let abs = dir.path().join("a.py");
        assert_eq!(sb.overlay_content(&abs).unwrap(), "disk");

        sb.stage(PendingChange::new("a.py", ChangeType::Edit, Some("disk".into()), Some("staged".into())));
        assert_eq!(sb.overlay_content(&abs).unwrap(), "staged");

        sb.stage(PendingChange::new("a.py", ChangeType::Delete, Some("disk".into()), None));
        assert!(!sb.overlay_exists(&abs));
        assert!(abs.exists());
    }

    #[test]
    fn glob_double_star_matches_root_files() {
        let m = compile_glob("**/*.py").unwrap();
        assert!(m.is_match("a.py"));
        assert!(m.is_match("pkg/mod/a.py"));
        assert!(!compile_glob("*.py").unwrap().is_match("pkg/a.py"));
        assert!(compile_glob("**/*.{py,rs}").unwrap().is_match("x/y.rs"));
        assert!(compile_glob("[").unwrap_err().starts_with("bad_glob:"));
    }

    #[test]
    fn summary_counts_changed_lines() {
        assert_eq!(change_summary(Some("a\nb\nc"), Some("a\nB\nc")), "+1 -1");
        assert_eq!(change_summary(None, Some("x\ny")), "+2 -0");
        assert_eq!(change_summary(Some("x"), None), "+0 -1");
    }
}
