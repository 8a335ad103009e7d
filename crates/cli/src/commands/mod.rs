pub mod config_cmd;
pub mod pending;
pub mod repo_map;
pub mod run;

use anyhow::Context;
use codeagent_config::AppConfig;
use codeagent_tools::{PendingChangeStore, SandboxFactory, pending_file_path};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Resolved workspace and configuration shared by every command.
pub struct Env {
    pub workspace: PathBuf,
    pub config: AppConfig,
}

impl Env {
    pub fn new(workspace: &Path, config_path: Option<&Path>) -> anyhow::Result<Self> {
        let workspace = workspace
            .canonicalize()
            .with_context(|| format!("workspace {} not found", workspace.display()))?;
        if !workspace.is_dir() {
            anyhow::bail!("workspace {} is not a directory", workspace.display());
        }
        let config = match config_path {
            Some(path) => AppConfig::load_with(path, |key| std::env::var(key).ok()),
            None => AppConfig::load(&workspace),
        }
        .context("failed to load config")?;
        Ok(Self { workspace, config })
    }

    pub fn pending_file(&self) -> PathBuf {
        pending_file_path(&self.workspace)
    }

    /// Store preloaded with the workspace's persisted changes.
    pub fn load_store(&self, store: PendingChangeStore) -> anyhow::Result<Arc<PendingChangeStore>> {
        let file = self.pending_file();
        store
            .load_from(&file)
            .with_context(|| format!("failed to read {}", file.display()))?;
        Ok(Arc::new(store))
    }

    pub fn save_store(&self, store: &PendingChangeStore) -> anyhow::Result<()> {
        let file = self.pending_file();
        store
            .save_to(&file, None, None)
            .with_context(|| format!("failed to write {}", file.display()))
    }

    pub fn factory(&self, store: Arc<PendingChangeStore>) -> SandboxFactory {
        SandboxFactory::new(store, self.config.sandbox.clone())
    }
}
