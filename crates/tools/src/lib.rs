//! Built-in tools for codeagent.
//!
//! Every file tool goes through the [`sandbox`]: paths are confined to the
//! workspace root, reads see staged changes layered over the disk, and
//! writes are staged in the [`PendingChangeStore`] until confirmed (or go
//! straight to disk with an undo snapshot in direct mode).
//!
//! [`ToolExecutor`] is the dispatcher the loop talks to. It owns the
//! registry built by [`default_registry`] and turns every call into an
//! observation envelope.

mod args;
pub mod executor;
pub mod file_read;
pub mod file_write;
pub mod knowledge;
pub mod patch_tools;
pub mod pending;
pub mod pending_diff;
pub mod sandbox;
pub mod shell;

use codeagent_config::ToolsConfig;
use codeagent_core::tool::ToolRegistry;
use std::sync::Arc;

pub use executor::{ToolExecutor, hint_for};
pub use file_read::{GrepTool, ListFilesTool, OpenFileViewTool, ReadFileTool, RepoMapTool, SearchFileTool};
pub use file_write::{FileWriteTool, WriteOp};
pub use knowledge::{KeywordSearch, KnowledgeHit, KnowledgeSearch, SearchKnowledgeTool};
pub use patch_tools::{ApplyPatchTool, BatchReplaceTool};
pub use pending::{ChangeType, PendingChange, PendingChangeStore, pending_file_path};
pub use pending_diff::{ApplyPendingDiffTool, Resolution, ResolveError, resolve_pending};
pub use sandbox::{Sandbox, SandboxFactory};
pub use shell::{RunCommandTool, default_allowed_commands};

/// Build the registry of built-in tools.
///
/// - RUN_COMMAND is only registered when `tools.run_command_enabled` is set
/// - SEARCH_KNOWLEDGE is only registered when a backend is supplied
pub fn default_registry(
    factory: &SandboxFactory,
    tools: &ToolsConfig,
    knowledge: Option<Arc<dyn KnowledgeSearch>>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(Box::new(ListFilesTool::new(factory.clone())));
    registry.register(Box::new(GrepTool::new(factory.clone())));
    registry.register(Box::new(ReadFileTool::new(factory.clone())));
    registry.register(Box::new(OpenFileViewTool::new(factory.clone())));
    registry.register(Box::new(SearchFileTool::new(factory.clone())));
    registry.register(Box::new(RepoMapTool::ranked(factory.clone())));
    registry.register(Box::new(RepoMapTool::structure(factory.clone())));

    for tool in FileWriteTool::all(factory) {
        registry.register(Box::new(tool));
    }
    registry.register(Box::new(ApplyPatchTool::new(factory.clone())));
    registry.register(Box::new(BatchReplaceTool::new(factory.clone())));
    registry.register(Box::new(ApplyPendingDiffTool::new(factory.clone())));

    if let Some(backend) = knowledge {
        registry.register(Box::new(SearchKnowledgeTool::new(backend)));
    }
    if tools.run_command_enabled {
        registry.register(Box::new(RunCommandTool::new(default_allowed_commands())));
    }
    registry
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use codeagent_config::SandboxConfig;

    /// A temp workspace plus a staged-mode factory with an empty store.
    pub fn factory_in() -> (tempfile::TempDir, SandboxFactory) {
        let dir = tempfile::tempdir().unwrap();
        let factory = SandboxFactory::new(Arc::new(PendingChangeStore::new()), SandboxConfig::default());
        (dir, factory)
    }
}
