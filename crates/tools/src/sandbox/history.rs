//! Bounded per-path undo stacks for direct writes.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// State of a path right before a direct write touched it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSnapshot {
    pub existed: bool,
    pub is_directory: bool,
    pub content: Option<String>,
}

impl FileSnapshot {
    pub fn file(content: Option<String>) -> Self {
        Self {
            existed: content.is_some(),
            is_directory: false,
            content,
        }
    }

    pub fn directory(existed: bool) -> Self {
        Self {
            existed,
            is_directory: true,
            content: None,
        }
    }
}

/// Undo stacks keyed by absolute path. The oldest snapshot is dropped once
/// a stack reaches `max_depth`.
#[derive(Debug)]
pub struct EditHistory {
    stacks: Mutex<HashMap<PathBuf, VecDeque<FileSnapshot>>>,
    max_depth: usize,
}

impl Default for EditHistory {
    fn default() -> Self {
        Self::new(20)
    }
}

impl EditHistory {
    pub fn new(max_depth: usize) -> Self {
        Self {
            stacks: Mutex::new(HashMap::new()),
            max_depth: max_depth.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, VecDeque<FileSnapshot>>> {
        self.stacks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, path: &Path, snapshot: FileSnapshot) {
        let mut stacks = self.lock();
        let stack = stacks.entry(path.to_path_buf()).or_default();
        while stack.len() >= self.max_depth {
            stack.pop_front();
        }
        stack.push_back(snapshot);
    }

    pub fn pop(&self, path: &Path) -> Option<FileSnapshot> {
        let mut stacks = self.lock();
        let stack = stacks.get_mut(path)?;
        let snapshot = stack.pop_back();
        if stack.is_empty() {
            stacks.remove(path);
        }
        snapshot
    }

    pub fn depth(&self, path: &Path) -> usize {
        self.lock().get(path).map_or(0, VecDeque::len)
    }
}
