//! Literal find-and-replace across many files.

use super::results::{BatchReplaceItem, BatchReplaceResult};
use super::{Sandbox, clamp_limit, compile_glob, is_binary_file, is_indexable, walk};
use crate::pending::ChangeType;
use codeagent_security::relative_unix;
use std::collections::HashSet;
use tracing::debug;

const DEFAULT_MAX_FILES: usize = 2000;
const MAX_FILES_CAP: usize = 20_000;
const DEFAULT_MAX_REPLACEMENTS: usize = 20_000;
const MAX_REPLACEMENTS_CAP: usize = 200_000;

fn count_lines(text: &str) -> usize {
    if text.is_empty() {
        0
    } else {
        1 + text.matches('\n').count()
    }
}

struct BatchRun<'a> {
    sandbox: &'a Sandbox,
    old_text: &'a str,
    new_text: &'a str,
    dry_run: bool,
    replacement_limit: usize,
    result: BatchReplaceResult,
}

impl BatchRun<'_> {
    /// Returns false once the replacement budget is spent.
    fn replace_in(&mut self, rel: &str, content: String) -> bool {
        let count = content.matches(self.old_text).count();
        if count == 0 {
            return true;
        }
        if self.result.replacements + count > self.replacement_limit {
            self.result.truncated = true;
            return false;
        }
        let updated = content.replace(self.old_text, self.new_text);
        let mut item = BatchReplaceItem {
            file_path: rel.to_string(),
            replacements: count,
            before_lines: count_lines(&content),
            after_lines: count_lines(&updated),
            error: None,
            old_content: Some(content),
            new_content: Some(updated),
        };
        if !self.dry_run
            && let Err(code) = self.sandbox.submit_change(
                rel,
                ChangeType::Edit,
                item.old_content.clone(),
                item.new_content.clone(),
            )
        {
            item.error = Some(code);
        } else {
            self.result.files_changed += 1;
            self.result.replacements += count;
        }
        self.result.items.push(item);
        true
    }

    fn item_error(&mut self, rel: &str, code: impl Into<String>) {
        self.result.items.push(BatchReplaceItem {
            file_path: rel.to_string(),
            error: Some(code.into()),
            ..BatchReplaceItem::default()
        });
    }
}

impl Sandbox {
    /// Replace every literal occurrence of `old_text` in the indexable files
    /// under `root` matching `glob`. Each changed file becomes one edit.
    #[allow(clippy::too_many_arguments)]
    pub fn batch_replace(
        &self,
        root: &str,
        glob: Option<&str>,
        old_text: &str,
        new_text: Option<&str>,
        max_files: Option<i64>,
        max_replacements: Option<i64>,
        dry_run: bool,
    ) -> BatchReplaceResult {
        let preview = dry_run || self.is_staged();
        if old_text.is_empty() {
            return BatchReplaceResult::fail("old_text_required", preview);
        }
        let Some(new_text) = new_text else {
            return BatchReplaceResult::fail("new_text_required", preview);
        };
        let Some(dir) = self.resolve(root) else {
            return BatchReplaceResult::fail("path_outside_workspace", preview);
        };
        if !dir.is_dir() {
            return BatchReplaceResult::fail("path_not_a_directory", preview);
        }
        let pattern = glob.map(str::trim).filter(|g| !g.is_empty()).unwrap_or("**/*");
        let matcher = match compile_glob(pattern) {
            Ok(m) => m,
            Err(code) => return BatchReplaceResult::fail(code, preview),
        };
        let file_limit = clamp_limit(max_files, DEFAULT_MAX_FILES, MAX_FILES_CAP);

        let mut run = BatchRun {
            sandbox: self,
            old_text,
            new_text,
            dry_run,
            replacement_limit: clamp_limit(max_replacements, DEFAULT_MAX_REPLACEMENTS, MAX_REPLACEMENTS_CAP),
            result: BatchReplaceResult {
                preview,
                ..BatchReplaceResult::default()
            },
        };
        let mut processed = HashSet::new();

        for entry in walk(&dir, None) {
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let Some(local) = relative_unix(&dir, entry.path()) else {
                continue;
            };
            if !matcher.is_match(&local) || !is_indexable(&local) || !self.overlay_exists(entry.path()) {
                continue;
            }
            if run.result.files_scanned >= file_limit {
                run.result.truncated = true;
                break;
            }
            let rel = self.rel(entry.path());
            processed.insert(rel.clone());
            run.result.files_scanned += 1;

            if self.pending_for(entry.path()).is_none() {
                if is_binary_file(entry.path()) {
                    run.item_error(&rel, "file_is_binary");
                    continue;
                }
                if self.too_large_on_disk(entry.path()) {
                    run.item_error(&rel, "file_too_large");
                    continue;
                }
            }
            let content = match self.overlay_content(entry.path()) {
                Ok(text) => text,
                Err(code) => {
                    run.item_error(&rel, code);
                    continue;
                }
            };
            if !run.replace_in(&rel, content) {
                break;
            }
        }

        if !run.result.truncated {
            for change in self.pending_changes() {
                if change.is_delete() || processed.contains(&change.path) {
                    continue;
                }
                let Some(local) = self.local_under(&dir, &change.path) else {
                    continue;
                };
                if !matcher.is_match(&local) || !is_indexable(&local) {
                    continue;
                }
                if run.result.files_scanned >= file_limit {
                    run.result.truncated = true;
                    break;
                }
                run.result.files_scanned += 1;
                if !run.replace_in(&change.path, change.new_content.unwrap_or_default()) {
                    break;
                }
            }
        }

        let mut result = run.result;
        result.success = true;
        result.summary = format!(
            "files={} changed={} replacements={} preview={}",
            result.files_scanned, result.files_changed, result.replacements, result.preview
        );
        debug!(summary = %result.summary, "Batch replace finished");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn replaces_across_files_as_one_edit_each() {
        let (dir, sb) = staged();
        write(&dir, "a.py", "foo(foo)\n");
        write(&dir, "pkg/b.py", "x = foo\n");
        write(&dir, "c.md", "foo\n");
        let r = sb.batch_replace("", Some("**/*.py"), "foo", Some("bar"), None, None, false);
        assert!(r.success);
        assert_eq!(r.files_scanned, 2);
        assert_eq!(r.files_changed, 2);
        assert_eq!(r.replacements, 3);
        assert_eq!(r.summary, "files=2 changed=2 replacements=3 preview=true");
        assert_eq!(r.items[0].before_lines, 2);

        let changes = sb.pending_changes();
        assert_eq!(changes.len(), 2);
        assert_eq!(
            sb.read_file("a.py", None, None, None).content,
            "1→bar(bar)\n"
        );
    }

    #[test]
    fn includes_staged_new_files_and_respects_budget() {
        let (dir, sb) = staged();
        write(&dir, "a.py", "foo foo foo\n");
        sb.create_file("n.py", "foo\n", false);
        let r = sb.batch_replace("", None, "foo", Some(""), None, Some(2), true);
        assert!(r.truncated);
        assert_eq!(r.replacements, 0);

        let r = sb.batch_replace("", None, "foo", Some("baz"), None, None, false);
        assert_eq!(r.replacements, 4);
        let n = sb.store().get_pending_change("n.py", None, None).unwrap();
        assert_eq!(n.new_content.as_deref(), Some("baz\n"));
    }

    #[test]
    fn argument_errors() {
        let (dir, sb) = staged();
        write(&dir, "a.py", "");
        assert_eq!(
            sb.batch_replace("", None, "", Some("x"), None, None, false).error.as_deref(),
            Some("old_text_required")
        );
        assert_eq!(
            sb.batch_replace("", None, "x", None, None, None, false).error.as_deref(),
            Some("new_text_required")
        );
        assert_eq!(
            sb.batch_replace("a.py", None, "x", Some("y"), None, None, false).error.as_deref(),
            Some("path_not_a_directory")
        );
        assert_eq!(count_lines(""), 0);
        assert_eq!(count_lines("a\nb"), 2);
    }
}
