//! `codeagent pending`: review staged changes outside the loop.

use clap::Subcommand;
use codeagent_security::{AuditEvent, AuditLogger, AuditOutcome};
use codeagent_tools::{PendingChange, PendingChangeStore, ResolveError, resolve_pending};

use super::Env;

#[derive(Subcommand)]
pub enum PendingAction {
    /// Show staged changes
    List {
        /// Include a diff preview for each change
        #[arg(long)]
        preview: bool,
    },

    /// Write staged changes to disk (all when no paths are given)
    Apply { paths: Vec<String> },

    /// Discard staged changes (all when no paths are given)
    Reject { paths: Vec<String> },
}

pub fn run(env: &Env, action: PendingAction, session: Option<&str>) -> anyhow::Result<()> {
    let store = env.load_store(PendingChangeStore::new())?;
    let sandbox = env.factory(store.clone()).for_root(&env.workspace, session);

    let (paths, reject) = match action {
        PendingAction::List { preview } => {
            print_changes(&sandbox.pending_changes(), preview);
            return Ok(());
        }
        PendingAction::Apply { paths } => (paths, false),
        PendingAction::Reject { paths } => (paths, true),
    };

    let audit = AuditLogger::tracing();
    let resolution = match resolve_pending(&sandbox, &paths, reject) {
        Ok(resolution) => resolution,
        Err(ResolveError::NoPendingChanges) => {
            println!("  No pending changes.");
            return Ok(());
        }
        Err(ResolveError::NoMatchingPendingChanges { available }) => {
            anyhow::bail!("no pending change matches {paths:?} (pending: {})", available.join(", "));
        }
    };

    for path in &resolution.applied {
        let event = if reject {
            AuditEvent::PendingRejected { path: path.clone() }
        } else {
            AuditEvent::PendingApplied { path: path.clone() }
        };
        audit.log(event, "cli", path, AuditOutcome::Success, None);
    }
    for failure in &resolution.errors {
        audit.log(
            AuditEvent::PendingApplied { path: failure.clone() },
            "cli",
            failure,
            AuditOutcome::Failure,
            None,
        );
    }
    env.save_store(&store)?;

    let verb = if reject { "Rejected" } else { "Applied" };
    println!("  {verb} {} change(s)", resolution.applied.len());
    for path in &resolution.applied {
        println!("    {path}");
    }
    if !resolution.errors.is_empty() {
        println!("  Failed:");
        for failure in &resolution.errors {
            println!("    {failure}");
        }
        anyhow::bail!("{} change(s) could not be applied", resolution.errors.len());
    }
    Ok(())
}

fn print_changes(changes: &[PendingChange], preview: bool) {
    if changes.is_empty() {
        println!("  No pending changes.");
        return;
    }
    println!("  {} pending change(s):", changes.len());
    for change in changes {
        let session = change.session_id.as_deref().unwrap_or("-");
        println!("    {:<6} {}  (session {session})", change.change_type.as_str(), change.path);
        if preview {
            if let Some(text) = change.preview.as_deref().filter(|p| !p.is_empty()) {
                for line in text.lines() {
                    println!("      {line}");
                }
            }
        }
    }
}
