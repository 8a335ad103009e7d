//! `codeagent config`: print the effective configuration.

use codeagent_config::AppConfig;

use super::Env;

pub fn show(env: &Env) -> anyhow::Result<()> {
    println!("# workspace: {}", env.workspace.display());
    println!("# file:      {}", AppConfig::config_path(&env.workspace).display());
    if env.config.has_api_key() {
        println!("# api key:   set (not shown)");
    }
    println!();
    println!("{}", redacted_toml(&env.config)?);
    Ok(())
}

/// TOML without the API key.
fn redacted_toml(config: &AppConfig) -> anyhow::Result<String> {
    let mut config = config.clone();
    config.model.api_key = None;
    Ok(config.to_toml()?)
}
