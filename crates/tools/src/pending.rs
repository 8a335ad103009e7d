//! Pending change store: staged edits that have not reached disk yet.
//!
//! Every write tool running in staged mode lands here instead of on disk.
//! The store keeps at most one change per (workspace, session, path) and
//! merges follow-up edits into it, so the baseline `old_content` is always
//! the file as it was before the first staged edit.
//!
//! The store is shared between concurrent sessions. All read-modify-write
//! sequences happen under a single write lock.

use chrono::Utc;
use codeagent_config::STATE_DIR;
use codeagent_core::{DomainEvent, EventBus};
use codeagent_security::normalize_rel_path;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

/// File name of the persisted store under the state directory.
pub const PENDING_FILE: &str = "pending_changes.json";

/// What a staged change does to its path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Create,
    Edit,
    Delete,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Create => "CREATE",
            ChangeType::Edit => "EDIT",
            ChangeType::Delete => "DELETE",
        }
    }

    /// Type of the change that results from staging `incoming` on top of `self`.
    ///
    /// Re-creating a deleted file is an edit of the original; editing a file
    /// that only exists as a staged create is still a create.
    pub fn merge(self, incoming: ChangeType) -> ChangeType {
        match (self, incoming) {
            (ChangeType::Delete, ChangeType::Create) => ChangeType::Edit,
            (ChangeType::Create, ChangeType::Edit) => ChangeType::Create,
            (_, incoming) => incoming,
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A staged, not-yet-applied filesystem mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingChange {
    pub id: String,
    /// Workspace-relative path, forward slashes.
    pub path: String,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    /// Content before the first staged edit. `None` for creates.
    #[serde(default)]
    pub old_content: Option<String>,
    /// Content after applying. `None` for deletes.
    #[serde(default)]
    pub new_content: Option<String>,
    #[serde(default)]
    pub preview: Option<String>,
    /// Milliseconds since the epoch.
    pub timestamp: i64,
    #[serde(default)]
    pub workspace_root: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl PendingChange {
    pub fn new(
        path: &str,
        change_type: ChangeType,
        old_content: Option<String>,
        new_content: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            path: normalize_rel_path(path),
            change_type,
            old_content,
            new_content,
            preview: None,
            timestamp: Utc::now().timestamp_millis(),
            workspace_root: None,
            session_id: None,
        }
    }

    pub fn scoped(mut self, workspace_root: Option<&str>, session_id: Option<&str>) -> Self {
        self.workspace_root = workspace_root.filter(|s| !s.trim().is_empty()).map(String::from);
        self.session_id = session_id.filter(|s| !s.trim().is_empty()).map(String::from);
        self
    }

    pub fn with_preview(mut self, preview: impl Into<String>) -> Self {
        self.preview = Some(preview.into());
        self
    }

    pub fn is_delete(&self) -> bool {
        self.change_type == ChangeType::Delete
    }
}

/// What happened when a change was handed to [`PendingChangeStore::add_change`].
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// First change for this path in this scope.
    Added(PendingChange),
    /// Folded into an existing change; carries the merged result.
    Merged(PendingChange),
    /// A delete cancelled a staged create; nothing is pending any more.
    Cancelled(PendingChange),
}

impl StageOutcome {
    pub fn change(&self) -> &PendingChange {
        match self {
            StageOutcome::Added(c) | StageOutcome::Merged(c) | StageOutcome::Cancelled(c) => c,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PendingFile {
    #[serde(default, alias = "pending_diff")]
    pending_changes: Vec<PendingChange>,
}

/// Thread-safe, in-memory store of staged changes.
#[derive(Default)]
pub struct PendingChangeStore {
    changes: RwLock<Vec<PendingChange>>,
    events: Option<Arc<EventBus>>,
}

impl fmt::Debug for PendingChangeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingChangeStore")
            .field("changes", &self.len())
            .finish()
    }
}

impl PendingChangeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that publishes staged/removed events on `events`.
    pub fn with_event_bus(events: Arc<EventBus>) -> Self {
        Self {
            changes: RwLock::new(Vec::new()),
            events: Some(events),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<PendingChange>> {
        self.changes.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<PendingChange>> {
        self.changes.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stage `change`, merging with any change already pending for the same
    /// path in the same scope.
    pub fn add_change(&self, change: PendingChange) -> StageOutcome {
        let key = path_key(&change.path);
        let outcome = {
            let mut changes = self.write();
            let existing = changes
                .iter()
                .position(|c| path_key(&c.path) == key && same_scope(c, &change));
            match existing {
                None => {
                    changes.push(change.clone());
                    StageOutcome::Added(change)
                }
                Some(idx) => {
                    let existing = changes.remove(idx);
                    if existing.change_type == ChangeType::Create && change.is_delete() {
                        StageOutcome::Cancelled(existing)
                    } else {
                        let merged = PendingChange {
                            id: existing.id,
                            path: existing.path,
                            change_type: existing.change_type.merge(change.change_type),
                            old_content: existing.old_content,
                            new_content: change.new_content,
                            preview: change.preview,
                            timestamp: change.timestamp,
                            workspace_root: change.workspace_root,
                            session_id: change.session_id,
                        };
                        changes.push(merged.clone());
                        StageOutcome::Merged(merged)
                    }
                }
            }
        };

        match &outcome {
            StageOutcome::Cancelled(c) => {
                debug!(path = %c.path, "Staged create cancelled by delete");
                self.publish_removed(c, "cancelled");
            }
            StageOutcome::Added(c) | StageOutcome::Merged(c) => {
                debug!(path = %c.path, change_type = %c.change_type, "Change staged");
                if let Some(events) = &self.events {
                    events.publish(DomainEvent::PendingChangeStaged {
                        path: c.path.clone(),
                        change_type: c.change_type.to_string(),
                        session_id: c.session_id.clone(),
                        timestamp: Utc::now(),
                    });
                }
            }
        }
        outcome
    }

    /// The change pending for `path` in the given scope, if any.
    pub fn get_pending_change(
        &self,
        path: &str,
        workspace_root: Option<&str>,
        session_id: Option<&str>,
    ) -> Option<PendingChange> {
        let key = path_key(path);
        self.read()
            .iter()
            .rev()
            .find(|c| path_key(&c.path) == key && scope_matches(c, workspace_root, session_id))
            .cloned()
    }

    /// All changes in the given scope, oldest first.
    pub fn get_changes(
        &self,
        workspace_root: Option<&str>,
        session_id: Option<&str>,
    ) -> Vec<PendingChange> {
        self.read()
            .iter()
            .filter(|c| scope_matches(c, workspace_root, session_id))
            .cloned()
            .collect()
    }

    pub fn has_pending_delete(
        &self,
        path: &str,
        workspace_root: Option<&str>,
        session_id: Option<&str>,
    ) -> bool {
        self.get_pending_change(path, workspace_root, session_id)
            .is_some_and(|c| c.is_delete())
    }

    /// Remove a change by id. `reason` ends up in the removal event.
    pub fn remove_change(&self, id: &str, reason: &str) -> Option<PendingChange> {
        let removed = {
            let mut changes = self.write();
            let idx = changes.iter().position(|c| c.id == id)?;
            changes.remove(idx)
        };
        self.publish_removed(&removed, reason);
        Some(removed)
    }

    /// Remove every change in scope. Returns how many were dropped.
    pub fn clear(&self, workspace_root: Option<&str>, session_id: Option<&str>) -> usize {
        let removed: Vec<PendingChange> = {
            let mut changes = self.write();
            let (gone, kept): (Vec<_>, Vec<_>) = changes
                .drain(..)
                .partition(|c| scope_matches(c, workspace_root, session_id));
            *changes = kept;
            gone
        };
        for change in &removed {
            self.publish_removed(change, "rejected");
        }
        removed.len()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn publish_removed(&self, change: &PendingChange, reason: &str) {
        if let Some(events) = &self.events {
            events.publish(DomainEvent::PendingChangeRemoved {
                path: change.path.clone(),
                reason: reason.into(),
                timestamp: Utc::now(),
            });
        }
    }

    /// Write the changes in scope to `file` as `{"pending_changes": [...]}`.
    pub fn save_to(
        &self,
        file: &Path,
        workspace_root: Option<&str>,
        session_id: Option<&str>,
    ) -> std::io::Result<()> {
        let doc = PendingFile {
            pending_changes: self.get_changes(workspace_root, session_id),
        };
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&doc).map_err(std::io::Error::other)?;
        std::fs::write(file, json)?;
        debug!(path = %file.display(), count = doc.pending_changes.len(), "Pending changes saved");
        Ok(())
    }

    /// Load changes from `file`, replacing any with the same id.
    /// A missing file loads nothing.
    pub fn load_from(&self, file: &Path) -> std::io::Result<usize> {
        let text = match std::fs::read_to_string(file) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };
        if text.trim().is_empty() {
            return Ok(0);
        }
        let doc: PendingFile = serde_json::from_str(&text)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let count = doc.pending_changes.len();
        let mut changes = self.write();
        for change in doc.pending_changes {
            changes.retain(|c| c.id != change.id);
            changes.push(change);
        }
        info!(path = %file.display(), count, "Pending changes loaded");
        Ok(count)
    }
}

/// Default location of the persisted store for a workspace.
pub fn pending_file_path(workspace: &Path) -> PathBuf {
    workspace.join(STATE_DIR).join(PENDING_FILE)
}

/// Normalized form of a workspace root used for scope comparison.
pub fn workspace_key(root: &str) -> String {
    let mut key = root.trim().replace('\\', "/");
    while key.len() > 1 && key.ends_with('/') {
        key.pop();
    }
    if cfg!(windows) { key.to_lowercase() } else { key }
}

fn path_key(path: &str) -> String {
    let key = normalize_rel_path(path);
    if cfg!(windows) { key.to_lowercase() } else { key }
}

fn same_scope(a: &PendingChange, b: &PendingChange) -> bool {
    a.workspace_root.as_deref().map(workspace_key) == b.workspace_root.as_deref().map(workspace_key)
        && a.session_id == b.session_id
}

fn scope_matches(change: &PendingChange, workspace_root: Option<&str>, session_id: Option<&str>) -> bool {
    if let Some(root) = workspace_root.filter(|s| !s.trim().is_empty())
        && change.workspace_root.as_deref().map(workspace_key) != Some(workspace_key(root))
    {
        return false;
    }
    match session_id.filter(|s| !s.trim().is_empty()) {
        Some(session) => change.session_id.as_deref() == Some(session),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edit(path: &str, old: &str, new: &str) -> PendingChange {
        PendingChange::new(path, ChangeType::Edit, Some(old.into()), Some(new.into()))
            .scoped(Some("/ws"), None)
    }

    #[test]
    fn two_edits_merge_into_one_change_with_first_baseline() {
        let store = PendingChangeStore::new();
        let first = store.add_change(edit("a.py", "v0", "v1"));
        store.add_change(edit("./a.py", "v1", "v2"));

        let changes = store.get_changes(Some("/ws"), None);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].id, first.change().id);
        assert_eq!(changes[0].old_content.as_deref(), Some("v0"));
        assert_eq!(changes[0].new_content.as_deref(), Some("v2"));
    }

    #[test]
    fn delete_then_create_merges_to_edit() {
        let store = PendingChangeStore::new();
        store.add_change(
            PendingChange::new("a.py", ChangeType::Delete, Some("orig".into()), None)
                .scoped(Some("/ws"), None),
        );
        let outcome = store.add_change(
            PendingChange::new("a.py", ChangeType::Create, None, Some("again".into()))
                .scoped(Some("/ws"), None),
        );
        let merged = outcome.change();
        assert_eq!(merged.change_type, ChangeType::Edit);
        assert_eq!(merged.old_content.as_deref(), Some("orig"));
        assert_eq!(merged.new_content.as_deref(), Some("again"));
    }

    #[test]
    fn create_then_edit_stays_create() {
        let store = PendingChangeStore::new();
        store.add_change(
            PendingChange::new("n.py", ChangeType::Create, None, Some("1".into()))
                .scoped(Some("/ws"), None),
        );
        store.add_change(edit("n.py", "1", "2"));
        let change = store.get_pending_change("n.py", Some("/ws"), None).unwrap();
        assert_eq!(change.change_type, ChangeType::Create);
        assert!(change.old_content.is_none());
        assert_eq!(change.new_content.as_deref(), Some("2"));
    }

    #[test]
    fn delete_cancels_staged_create() {
        let store = PendingChangeStore::new();
        store.add_change(
            PendingChange::new("n.py", ChangeType::Create, None, Some("1".into()))
                .scoped(Some("/ws"), None),
        );
        let outcome = store.add_change(
            PendingChange::new("n.py", ChangeType::Delete, Some("1".into()), None)
                .scoped(Some("/ws"), None),
        );
        assert!(matches!(outcome, StageOutcome::Cancelled(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn sessions_do_not_share_changes() {
        let store = PendingChangeStore::new();
        store.add_change(
            PendingChange::new("a.py", ChangeType::Edit, Some("0".into()), Some("s1".into()))
                .scoped(Some("/ws"), Some("s1")),
        );
        store.add_change(
            PendingChange::new("a.py", ChangeType::Edit, Some("0".into()), Some("s2".into()))
                .scoped(Some("/ws"), Some("s2")),
        );
        assert_eq!(store.len(), 2);
        let s1 = store.get_pending_change("a.py", Some("/ws"), Some("s1")).unwrap();
        assert_eq!(s1.new_content.as_deref(), Some("s1"));
        assert_eq!(store.get_changes(Some("/ws/"), None).len(), 2);
        assert!(store.get_changes(Some("/other"), None).is_empty());
    }

    #[test]
    fn remove_and_clear_publish_events() {
        let bus = Arc::new(EventBus::new(16));
        let mut rx = bus.subscribe();
        let store = PendingChangeStore::with_event_bus(bus);

        let staged = store.add_change(edit("a.py", "0", "1"));
        store.add_change(edit("b.py", "0", "1"));
        assert!(store.remove_change(&staged.change().id, "applied").is_some());
        assert!(store.remove_change("missing", "applied").is_none());
        assert_eq!(store.clear(Some("/ws"), None), 1);

        let mut removed = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(*event, DomainEvent::PendingChangeRemoved { .. }) {
                removed += 1;
            }
        }
        assert_eq!(removed, 2);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = pending_file_path(dir.path());

        let store = PendingChangeStore::new();
        store.add_change(edit("src/a.py", "x", "y").with_preview("1 line changed"));
        store.save_to(&file, Some("/ws"), None).unwrap();

        let text = std::fs::read_to_string(&file).unwrap();
        assert!(text.contains("\"pending_changes\""));
        assert!(text.contains("\"old_content\""));
        assert!(text.contains("\"EDIT\""));

        let restored = PendingChangeStore::new();
        assert_eq!(restored.load_from(&file).unwrap(), 1);
        let change = restored.get_pending_change("src/a.py", Some("/ws"), None).unwrap();
        assert_eq!(change.preview.as_deref(), Some("1 line changed"));
    }

    #[test]
    fn load_accepts_legacy_key_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = PendingChangeStore::new();
        assert_eq!(store.load_from(&dir.path().join("none.json")).unwrap(), 0);

        let file = dir.path().join("legacy.json");
        std::fs::write(
            &file,
            r#"{"pending_diff":[{"id":"1","path":"a.py","type":"DELETE","timestamp":5}]}"#,
        )
        .unwrap();
        assert_eq!(store.load_from(&file).unwrap(), 1);
        assert!(store.has_pending_delete("a.py", None, None));
    }
}
