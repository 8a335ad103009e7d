//! `codeagent run`: drive the loop on one goal.

use anyhow::Context;
use clap::Args;
use codeagent_agent::{AgentLimits, ReActLoopController, RunOutcome};
use codeagent_config::WriteMode;
use codeagent_core::event::EventBus;
use codeagent_core::model::ModelClient;
use codeagent_providers::{OpenAiCompatClient, ScriptedModel};
use codeagent_security::{AuditLogger, ToolPolicy};
use codeagent_tools::{KeywordSearch, KnowledgeSearch, PendingChangeStore, SandboxFactory, ToolExecutor, default_registry};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use super::Env;

#[derive(Args)]
pub struct RunArgs {
    /// What the agent should do
    pub goal: String,

    /// Session id that owns the staged changes
    #[arg(short, long)]
    pub session: Option<String>,

    /// Write to disk immediately instead of staging
    #[arg(long)]
    pub direct_write: bool,

    /// Replay model responses from a file instead of calling the API
    #[arg(long)]
    pub script: Option<PathBuf>,

    /// IDE structure snapshot to include as context
    #[arg(long)]
    pub ide_context: Option<PathBuf>,

    /// Prior conversation, one `User: ...` / `Assistant: ...` line each
    #[arg(long)]
    pub chat_history: Option<PathBuf>,

    /// Print the full run outcome as JSON
    #[arg(long)]
    pub json: bool,
}

fn model_client(env: &Env, script: Option<&PathBuf>) -> anyhow::Result<Arc<dyn ModelClient>> {
    if let Some(path) = script {
        let model = ScriptedModel::from_file(path)?;
        info!(path = %path.display(), responses = model.len(), "Using scripted model");
        return Ok(Arc::new(model));
    }
    if !env.config.has_api_key() {
        anyhow::bail!(
            "no API key configured: set CODEAGENT_API_KEY (or OPENAI_API_KEY), add api_key to [model], or pass --script"
        );
    }
    Ok(Arc::new(OpenAiCompatClient::from_config(&env.config.model)?))
}

fn read_chat_history(path: &PathBuf) -> anyhow::Result<Vec<String>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .map(String::from)
        .collect())
}

pub async fn run(env: &Env, args: RunArgs) -> anyhow::Result<()> {
    let mut config = env.config.clone();
    if args.direct_write {
        config.sandbox.mode = WriteMode::Direct;
    }

    let events = Arc::new(EventBus::default());
    let store = env.load_store(PendingChangeStore::with_event_bus(Arc::clone(&events)))?;
    let factory = SandboxFactory::new(Arc::clone(&store), config.sandbox.clone());
    let knowledge: Arc<dyn KnowledgeSearch> = Arc::new(KeywordSearch::new(factory.clone()));
    let registry = default_registry(&factory, &config.tools, Some(knowledge));
    let executor = ToolExecutor::new(registry, ToolPolicy::from_config(&config.tools), config.tools.max_args_chars)
        .with_audit(Arc::new(AuditLogger::tracing()))
        .with_event_bus(Arc::clone(&events));

    let model = model_client(env, args.script.as_ref())?;
    let sandbox = factory.for_root(&env.workspace, args.session.as_deref());

    let mut controller = ReActLoopController::new(model, Arc::new(executor), sandbox, AgentLimits::from(&config.agent))
        .with_event_bus(events);
    if let Some(path) = &args.chat_history {
        controller = controller.with_chat_history(read_chat_history(path)?);
    }
    if let Some(path) = args.ide_context {
        // relative to the shell first, else to the workspace
        controller = controller.with_ide_context(path.canonicalize().unwrap_or(path));
    }

    let outcome = controller.run_detailed(&args.goal).await?;
    env.save_store(&store)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }
    Ok(())
}

fn print_outcome(outcome: &RunOutcome) {
    println!("{}", outcome.answer);
    println!();
    println!(
        "  turns: {}  tool calls: {}  stop: {}",
        outcome.turns, outcome.tool_calls, outcome.stop_reason
    );
    if outcome.edits.applied + outcome.edits.rejected > 0 {
        println!("  applied: {}  rejected: {}", outcome.edits.applied, outcome.edits.rejected);
    }
    if outcome.pending_changes.is_empty() {
        return;
    }
    println!();
    println!("  Pending changes (review with `codeagent pending list`):");
    for change in &outcome.pending_changes {
        println!("    {:<6} {}", change.change_type.as_str(), change.path);
    }
}
