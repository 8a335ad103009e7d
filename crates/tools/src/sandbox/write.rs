//! Write-side operations.
//!
//! Each operation validates against the overlay, computes the new content,
//! then hands it to [`Sandbox::submit_change`], which either stages it or
//! writes it to disk depending on the sandbox mode. Dry runs stop right
//! before submitting.

use super::results::EditFileResult;
use super::{FileSnapshot, Sandbox, change_summary, is_binary_file, read_text};
use crate::pending::{ChangeType, PendingChange};
use codeagent_core::text::split_lines;
use std::path::PathBuf;
use tracing::{debug, info};

/// Split replacement text into lines, ignoring one trailing newline.
fn text_lines(text: &str) -> Vec<&str> {
    split_lines(text.strip_suffix('\n').unwrap_or(text))
}

/// Number of real lines in a `split_lines` vector (a trailing empty
/// segment is the final newline, not a line).
fn line_count(lines: &[&str]) -> usize {
    match lines.last() {
        Some(last) if last.is_empty() => lines.len() - 1,
        _ => lines.len(),
    }
}

impl Sandbox {
    /// Stage or apply a change. `old` is the overlay content before the
    /// change, `None` when the path did not exist.
    pub(crate) fn submit_change(
        &self,
        rel: &str,
        change_type: ChangeType,
        old: Option<String>,
        new: Option<String>,
    ) -> Result<(), String> {
        if !self.is_staged() {
            let applied = self.apply_to_file(rel, new.as_deref(), change_type == ChangeType::Delete);
            return match applied.error {
                Some(code) => Err(code),
                None => Ok(()),
            };
        }
        let preview = change_summary(old.as_deref(), new.as_deref());
        self.stage(PendingChange::new(rel, change_type, old, new).with_preview(preview));
        Ok(())
    }

    fn commit(
        &self,
        rel: &str,
        change_type: ChangeType,
        old: Option<String>,
        new: Option<String>,
        dry_run: bool,
    ) -> EditFileResult {
        if !dry_run
            && let Err(code) = self.submit_change(rel, change_type, old.clone(), new.clone())
        {
            return EditFileResult {
                old_content: old,
                new_content: new,
                ..EditFileResult::fail(rel, code)
            };
        }
        EditFileResult::ok(rel, self.is_staged(), old, new).dry(dry_run)
    }

    /// Resolve an existing text file for editing and load its overlay content.
    fn load_editable(&self, path: &str) -> Result<(PathBuf, String, String), String> {
        let abs = self.resolve(path).ok_or("path_outside_workspace")?;
        let rel = self.rel(&abs);
        let staged = self.pending_for(&abs).is_some();
        if !self.overlay_exists(&abs) || (!staged && !abs.is_file()) {
            return Err("file_not_found".into());
        }
        if self.overlay_is_binary(&abs) {
            return Err("file_is_binary".into());
        }
        let content = self.overlay_content(&abs)?;
        if self.too_large(&content) {
            return Err("file_too_large".into());
        }
        Ok((abs, rel, content))
    }

    /// Write (or delete) `rel` on disk right now, pushing an undo snapshot
    /// first. Used by direct mode and by applying staged changes.
    pub fn apply_to_file(&self, rel: &str, content: Option<&str>, delete: bool) -> EditFileResult {
        let Some(abs) = self.resolve(rel) else {
            return EditFileResult::fail(rel, "path_outside_workspace");
        };
        let rel = self.rel(&abs);
        if rel.is_empty() {
            return EditFileResult::fail(rel, "cannot_modify_workspace_root");
        }

        if delete {
            if std::fs::symlink_metadata(&abs).is_err() {
                return EditFileResult::ok(rel, false, None, None);
            }
            if abs.is_dir() {
                let empty = std::fs::read_dir(&abs).is_ok_and(|mut d| d.next().is_none());
                if !empty {
                    return EditFileResult::fail(rel, "directory_not_empty");
                }
                self.history().push(&abs, FileSnapshot::directory(true));
                if let Err(e) = std::fs::remove_dir(&abs) {
                    return EditFileResult::fail(rel, format!("io_error:{:?}", e.kind()));
                }
                info!(path = %rel, "Directory deleted");
                return EditFileResult::ok(rel, false, None, None);
            }
            if is_binary_file(&abs) {
                return EditFileResult::fail(rel, "file_is_binary");
            }
            let old = match read_text(&abs) {
                Ok(text) => text,
                Err(code) => return EditFileResult::fail(rel, code),
            };
            self.history().push(&abs, FileSnapshot::file(Some(old.clone())));
            if let Err(e) = std::fs::remove_file(&abs) {
                return EditFileResult::fail(rel, format!("io_error:{:?}", e.kind()));
            }
            info!(path = %rel, "File deleted");
            return EditFileResult::ok(rel, false, Some(old), None);
        }

        let new = content.unwrap_or_default();
        if self.too_large(new) {
            return EditFileResult::fail(rel, "file_too_large");
        }
        let old = if abs.is_dir() {
            return EditFileResult::fail(rel, "not_a_file");
        } else if abs.is_file() {
            if is_binary_file(&abs) {
                return EditFileResult::fail(rel, "file_is_binary");
            }
            match read_text(&abs) {
                Ok(text) => Some(text),
                Err(code) => return EditFileResult::fail(rel, code),
            }
        } else {
            None
        };

        self.history().push(&abs, FileSnapshot::file(old.clone()));
        if let Some(parent) = abs.parent()
            && let Err(e) = std::fs::create_dir_all(parent)
        {
            return EditFileResult::fail(rel, format!("io_error:{:?}", e.kind()));
        }
        if let Err(e) = std::fs::write(&abs, new) {
            return EditFileResult::fail(rel, format!("io_error:{:?}", e.kind()));
        }
        info!(path = %rel, bytes = new.len(), created = old.is_none(), "File written");
        EditFileResult::ok(rel, false, old, Some(new.to_string()))
    }

    /// Replace the first occurrence of `old_text` with `new_text`.
    pub fn edit_file(&self, path: &str, old_text: &str, new_text: &str, dry_run: bool) -> EditFileResult {
        let (_, rel, content) = match self.load_editable(path) {
            Ok(loaded) => loaded,
            Err(code) => return EditFileResult::fail(path, code).dry(dry_run),
        };
        if old_text.is_empty() {
            return EditFileResult {
                old_content: Some(content),
                ..EditFileResult::fail(rel, "old_text_required").dry(dry_run)
            };
        }
        if !content.contains(old_text) {
            return EditFileResult {
                old_content: Some(content),
                ..EditFileResult::fail(rel, "old_text_not_found").dry(dry_run)
            };
        }
        let updated = content.replacen(old_text, new_text, 1);
        self.commit(&rel, ChangeType::Edit, Some(content), Some(updated), dry_run)
    }

    /// Create a new file. Fails if anything already exists at `path`.
    pub fn create_file(&self, path: &str, text: &str, dry_run: bool) -> EditFileResult {
        if self.too_large(text) {
            return EditFileResult::fail(path, "file_too_large").dry(dry_run);
        }
        let Some(abs) = self.resolve(path) else {
            return EditFileResult::fail(path, "path_outside_workspace").dry(dry_run);
        };
        let rel = self.rel(&abs);
        if rel.is_empty() || self.overlay_exists(&abs) {
            return EditFileResult::fail(rel, "file_already_exists").dry(dry_run);
        }
        if let Some(parent) = abs.parent()
            && parent.exists()
            && !parent.is_dir()
        {
            return EditFileResult::fail(rel, "parent_not_directory").dry(dry_run);
        }
        self.commit(&rel, ChangeType::Create, None, Some(text.to_string()), dry_run)
    }

    /// Replace the whole content of a file, creating it when missing.
    pub fn overwrite_file(&self, path: &str, content: &str, dry_run: bool) -> EditFileResult {
        let Some(abs) = self.resolve(path) else {
            return EditFileResult::fail(path, "path_outside_workspace").dry(dry_run);
        };
        let rel = self.rel(&abs);
        if self.too_large(content) {
            return EditFileResult::fail(rel, "file_too_large").dry(dry_run);
        }
        if !self.overlay_exists(&abs) {
            if let Some(parent) = abs.parent()
                && parent.exists()
                && !parent.is_dir()
            {
                return EditFileResult::fail(rel, "parent_not_directory").dry(dry_run);
            }
            return self.commit(&rel, ChangeType::Create, None, Some(content.to_string()), dry_run);
        }
        if rel.is_empty() || (self.pending_for(&abs).is_none() && abs.is_dir()) {
            return EditFileResult::fail(rel, "not_a_file").dry(dry_run);
        }
        if self.overlay_is_binary(&abs) {
            return EditFileResult::fail(rel, "file_is_binary").dry(dry_run);
        }
        let old = match self.overlay_content(&abs) {
            Ok(text) => text,
            Err(code) => return EditFileResult::fail(rel, code).dry(dry_run),
        };
        self.commit(&rel, ChangeType::Edit, Some(old), Some(content.to_string()), dry_run)
    }

    /// Insert `text` after line `line` (0 inserts at the top).
    pub fn insert_into_file(&self, path: &str, line: i64, text: &str, dry_run: bool) -> EditFileResult {
        if line < 0 {
            return EditFileResult::fail(path, "insert_line_invalid").dry(dry_run);
        }
        let (_, rel, content) = match self.load_editable(path) {
            Ok(loaded) => loaded,
            Err(code) => return EditFileResult::fail(path, code).dry(dry_run),
        };
        let mut lines = split_lines(&content);
        let idx = (line as usize).min(line_count(&lines));
        lines.splice(idx..idx, text_lines(text));
        let updated = lines.join("\n");
        self.commit(&rel, ChangeType::Edit, Some(content), Some(updated), dry_run)
    }

    /// Replace lines `start..=end` (1-based, `end` clamped to the file) with
    /// `new_content`. An empty replacement deletes the lines.
    pub fn replace_lines(
        &self,
        path: &str,
        start: i64,
        end: i64,
        new_content: &str,
        dry_run: bool,
    ) -> EditFileResult {
        if start < 1 {
            return EditFileResult::fail(path, "start_line_invalid").dry(dry_run);
        }
        if end < start {
            return EditFileResult::fail(path, "end_line_invalid").dry(dry_run);
        }
        let (_, rel, content) = match self.load_editable(path) {
            Ok(loaded) => loaded,
            Err(code) => return EditFileResult::fail(path, code).dry(dry_run),
        };
        let mut lines = split_lines(&content);
        let count = line_count(&lines);
        let (start, end) = (start as usize, end as usize);
        if start > count {
            return EditFileResult {
                old_content: Some(content),
                ..EditFileResult::fail(rel, "start_line_out_of_bounds").dry(dry_run)
            };
        }
        let end = end.min(count);
        let replacement = if new_content.is_empty() {
            Vec::new()
        } else {
            text_lines(new_content)
        };
        lines.splice(start - 1..end, replacement);
        let updated = lines.join("\n");
        self.commit(&rel, ChangeType::Edit, Some(content), Some(updated), dry_run)
    }

    /// Cancel the staged change for `path`, or roll back the most recent
    /// direct write.
    pub fn undo_edit(&self, path: &str) -> EditFileResult {
        let Some(abs) = self.resolve(path) else {
            return EditFileResult::fail(path, "path_outside_workspace");
        };
        let rel = self.rel(&abs);
        if let Some(change) = self.pending_for(&abs) {
            self.store().remove_change(&change.id, "undone");
            debug!(path = %rel, "Staged change undone");
            return EditFileResult::ok(rel, true, change.new_content, change.old_content);
        }

        let Some(snapshot) = self.history().pop(&abs) else {
            return EditFileResult::fail(rel, "no_edit_history");
        };
        let current = read_text(&abs).ok();
        let restored = if snapshot.is_directory {
            if snapshot.existed {
                std::fs::create_dir_all(&abs)
            } else if abs.is_dir() {
                std::fs::remove_dir(&abs)
            } else {
                Ok(())
            }
        } else if let Some(content) = &snapshot.content {
            abs.parent()
                .map_or(Ok(()), std::fs::create_dir_all)
                .and_then(|_| std::fs::write(&abs, content))
        } else if abs.is_file() {
            std::fs::remove_file(&abs)
        } else {
            Ok(())
        };
        if let Err(e) = restored {
            return EditFileResult::fail(rel, format!("io_error:{:?}", e.kind()));
        }
        info!(path = %rel, existed = snapshot.existed, "Direct write undone");
        EditFileResult::ok(rel, false, current, snapshot.content)
    }

    /// Delete a file, or a directory whose children are all pending deletes.
    pub fn delete_path(&self, path: &str, dry_run: bool) -> EditFileResult {
        let Some(abs) = self.resolve(path) else {
            return EditFileResult::fail(path, "path_outside_workspace").dry(dry_run);
        };
        let rel = self.rel(&abs);
        if rel.is_empty() {
            return EditFileResult::fail(rel, "cannot_delete_workspace_root").dry(dry_run);
        }

        if self.pending_for(&abs).is_none() && abs.is_dir() {
            let entries = match std::fs::read_dir(&abs) {
                Ok(entries) => entries,
                Err(e) => return EditFileResult::fail(rel, format!("io_error:{:?}", e.kind())).dry(dry_run),
            };
            for entry in entries.flatten() {
                let child_deleted = self.pending_for(&entry.path()).is_some_and(|c| c.is_delete());
                if !child_deleted {
                    return EditFileResult::fail(rel, "directory_not_empty").dry(dry_run);
                }
            }
            let prefix = format!("{rel}/");
            let busy = self
                .pending_changes()
                .iter()
                .any(|c| !c.is_delete() && c.path.starts_with(&prefix));
            if busy {
                return EditFileResult::fail(rel, "directory_has_pending_changes").dry(dry_run);
            }
            return self.commit(&rel, ChangeType::Delete, None, None, dry_run);
        }

        if !self.overlay_exists(&abs) {
            return EditFileResult::fail(rel, "path_not_found").dry(dry_run);
        }
        if self.overlay_is_binary(&abs) {
            return EditFileResult::fail(rel, "file_is_binary").dry(dry_run);
        }
        let content = match self.overlay_content(&abs) {
            Ok(text) => text,
            Err(code) => return EditFileResult::fail(rel, code).dry(dry_run),
        };
        if self.too_large(&content) {
            return EditFileResult::fail(rel, "file_too_large").dry(dry_run);
        }
        self.commit(&rel, ChangeType::Delete, Some(content), None, dry_run)
    }

    /// Create a directory (and its parents) immediately. Directories are
    /// never staged.
    pub fn create_directory(&self, path: &str, dry_run: bool) -> EditFileResult {
        let Some(abs) = self.resolve(path) else {
            return EditFileResult::fail(path, "path_outside_workspace").dry(dry_run);
        };
        let rel = self.rel(&abs);
        if abs.exists() || self.overlay_exists(&abs) {
            return EditFileResult::fail(rel, "path_already_exists").dry(dry_run);
        }
        if dry_run {
            return EditFileResult::ok(rel, true, None, None).dry(true);
        }
        if let Err(e) = std::fs::create_dir_all(&abs) {
            return EditFileResult::fail(rel, format!("io_error:{:?}", e.kind()));
        }
        self.history().push(&abs, FileSnapshot::directory(false));
        info!(path = %rel, "Directory created");
        EditFileResult::ok(rel, false, None, None)
    }

    /// Move a file, or every indexable file under a directory, as a create
    /// at the destination plus a delete at the source.
    pub fn move_path(&self, source: &str, dest: &str, dry_run: bool) -> EditFileResult {
        let Some(src_abs) = self.resolve(source) else {
            return EditFileResult::fail(source, "source_outside_workspace").dry(dry_run);
        };
        let Some(dst_abs) = self.resolve(dest) else {
            return EditFileResult::fail(dest, "dest_outside_workspace").dry(dry_run);
        };
        let src_rel = self.rel(&src_abs);
        let dst_rel = self.rel(&dst_abs);
        if src_rel.is_empty() || dst_rel.is_empty() || dst_rel.starts_with(&format!("{src_rel}/")) {
            return EditFileResult::fail(src_rel, "invalid_move").dry(dry_run);
        }
        if !self.overlay_exists(&src_abs) {
            return EditFileResult::fail(src_rel, "source_not_found").dry(dry_run);
        }
        if self.overlay_exists(&dst_abs) {
            return EditFileResult::fail(dst_rel, "dest_already_exists").dry(dry_run);
        }

        if self.pending_for(&src_abs).is_none() && src_abs.is_dir() {
            let listing = self.list_files(&src_rel, Some("**/*"), Some(10_000), Some(50));
            if let Some(code) = listing.error {
                return EditFileResult::fail(src_rel, code).dry(dry_run);
            }
            let prefix = format!("{src_rel}/");
            for file in &listing.files {
                let Some(suffix) = file.strip_prefix(&prefix) else {
                    continue;
                };
                let from = self.root().join(file);
                if self.overlay_is_binary(&from) {
                    continue;
                }
                let Ok(content) = self.overlay_content(&from) else {
                    continue;
                };
                if dry_run {
                    continue;
                }
                let target = format!("{dst_rel}/{suffix}");
                if let Err(code) = self
                    .submit_change(&target, ChangeType::Create, None, Some(content.clone()))
                    .and_then(|_| self.submit_change(file, ChangeType::Delete, Some(content), None))
                {
                    return EditFileResult::fail(file.as_str(), code);
                }
            }
            info!(from = %src_rel, to = %dst_rel, files = listing.files.len(), "Directory moved");
            return EditFileResult::ok(dst_rel, self.is_staged(), None, None).dry(dry_run);
        }

        if self.overlay_is_binary(&src_abs) {
            return EditFileResult::fail(src_rel, "file_is_binary").dry(dry_run);
        }
        let content = match self.overlay_content(&src_abs) {
            Ok(text) => text,
            Err(code) => return EditFileResult::fail(src_rel, code).dry(dry_run),
        };
        if !dry_run
            && let Err(code) = self
                .submit_change(&dst_rel, ChangeType::Create, None, Some(content.clone()))
                .and_then(|_| self.submit_change(&src_rel, ChangeType::Delete, Some(content.clone()), None))
        {
            return EditFileResult::fail(src_rel, code);
        }
        EditFileResult::ok(dst_rel, self.is_staged(), Some(content.clone()), Some(content)).dry(dry_run)
    }
}
