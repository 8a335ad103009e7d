//! `codeagent repo-map`: print the repository map through the overlay.

use codeagent_tools::PendingChangeStore;
use codeagent_tools::sandbox::MapOptions;

use super::Env;

pub fn run(env: &Env, path: &str, focus: Vec<String>, unranked: bool, max_chars: Option<i64>) -> anyhow::Result<()> {
    // staged changes are part of the map
    let store = env.load_store(PendingChangeStore::new())?;
    let sandbox = env.factory(store).for_root(&env.workspace, None);
    let options = MapOptions {
        max_chars,
        focus,
        ..MapOptions::default()
    };
    let map = if unranked {
        sandbox.structure_map(path, &options)
    } else {
        sandbox.repo_map(path, &options)
    };
    if let Some(code) = map.error {
        anyhow::bail!("repo map failed: {code}");
    }
    println!("{}", map.content);
    if map.truncated {
        eprintln!("  (truncated; {} files scanned)", map.total_files);
    }
    Ok(())
}
