//! codeagent CLI: the main entry point.
//!
//! Commands:
//! - `run`: Drive the ReAct loop on a goal inside a workspace
//! - `pending`: List, apply or reject staged changes
//! - `repo-map`: Print the dependency-ranked repository map
//! - `config`: Print the effective configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::Env;

#[derive(Parser)]
#[command(
    name = "codeagent",
    about = "codeagent: ReAct coding loop over a sandboxed workspace",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Workspace root (defaults to the current directory)
    #[arg(short, long, global = true, default_value = ".")]
    workspace: PathBuf,

    /// Explicit config file instead of <workspace>/.codeagent/config.toml
    #[arg(short, long, global = true, env = "CODEAGENT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent loop on a goal
    Run(commands::run::RunArgs),

    /// Manage staged changes
    Pending {
        #[command(subcommand)]
        action: commands::pending::PendingAction,

        /// Only changes staged by this session
        #[arg(short, long, global = true)]
        session: Option<String>,
    },

    /// Print the repository map
    RepoMap {
        /// Directory to map, relative to the workspace
        #[arg(default_value = ".")]
        path: String,

        /// Paths to rank higher
        #[arg(short, long)]
        focus: Vec<String>,

        /// Plain directory tree without ranking
        #[arg(long)]
        unranked: bool,

        #[arg(long)]
        max_chars: Option<i64>,
    },

    /// Print the effective configuration
    Config,
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    // logs go to stderr so stdout stays clean for answers and JSON output
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let env = Env::new(&cli.workspace, cli.config.as_deref())?;

    match cli.command {
        Commands::Run(args) => commands::run::run(&env, args).await?,
        Commands::Pending { action, session } => commands::pending::run(&env, action, session.as_deref())?,
        Commands::RepoMap {
            path,
            focus,
            unranked,
            max_chars,
        } => commands::repo_map::run(&env, &path, focus, unranked, max_chars)?,
        Commands::Config => commands::config_cmd::show(&env)?,
    }

    Ok(())
}
