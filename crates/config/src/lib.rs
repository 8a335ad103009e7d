//! Configuration loading, validation, and management for codeagent.
//!
//! Loads configuration from `<workspace>/.codeagent/config.toml` with
//! environment variable overrides. Validates all settings at startup.
//! Every limit the loop and the sandbox enforce lives here so tests can
//! inject deterministic values instead of reading process globals.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory under the workspace root holding config and staged state.
pub const STATE_DIR: &str = ".codeagent";

/// The root configuration structure.
///
/// Maps directly to `.codeagent/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Loop limits
    #[serde(default)]
    pub agent: AgentConfig,

    /// Filesystem sandbox settings
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Tool policy
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Model endpoint
    #[serde(default)]
    pub model: ModelConfig,
}

/// Hard caps enforced inside the ReAct loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,

    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: usize,

    /// Consecutive failures of the same tool before execution is skipped
    #[serde(default = "default_tool_backoff_threshold")]
    pub tool_backoff_threshold: usize,

    /// Consecutive tool errors before the aggravated hint
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: usize,

    /// Repair retries when model output is not valid JSON
    #[serde(default = "default_max_parse_retries")]
    pub max_parse_retries: usize,

    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,

    /// Turn-history entries considered for the prompt tail
    #[serde(default = "default_history_tail")]
    pub history_tail: usize,

    #[serde(default = "default_max_facts")]
    pub max_facts: usize,

    /// Identical READ_FILE signatures allowed before the run is cut short
    #[serde(default = "default_read_loop_limit")]
    pub read_loop_limit: usize,

    #[serde(default = "default_low_efficiency_streak")]
    pub low_efficiency_streak: usize,

    #[serde(default = "default_low_efficiency_ratio")]
    pub low_efficiency_ratio: f64,

    #[serde(default = "default_max_chat_history_chars")]
    pub max_chat_history_chars: usize,
}

fn default_max_turns() -> usize {
    30
}
fn default_max_tool_calls() -> usize {
    18
}
fn default_tool_backoff_threshold() -> usize {
    2
}
fn default_max_consecutive_errors() -> usize {
    3
}
fn default_max_parse_retries() -> usize {
    2
}
fn default_max_prompt_chars() -> usize {
    24_000
}
fn default_history_tail() -> usize {
    6
}
fn default_max_facts() -> usize {
    120
}
fn default_read_loop_limit() -> usize {
    3
}
fn default_low_efficiency_streak() -> usize {
    3
}
fn default_low_efficiency_ratio() -> f64 {
    0.5
}
fn default_max_chat_history_chars() -> usize {
    4000
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_tool_calls: default_max_tool_calls(),
            tool_backoff_threshold: default_tool_backoff_threshold(),
            max_consecutive_errors: default_max_consecutive_errors(),
            max_parse_retries: default_max_parse_retries(),
            max_prompt_chars: default_max_prompt_chars(),
            history_tail: default_history_tail(),
            max_facts: default_max_facts(),
            read_loop_limit: default_read_loop_limit(),
            low_efficiency_streak: default_low_efficiency_streak(),
            low_efficiency_ratio: default_low_efficiency_ratio(),
            max_chat_history_chars: default_max_chat_history_chars(),
        }
    }
}

/// Whether mutating tools touch disk or stage pending changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    #[default]
    Staged,
    Direct,
}

impl std::str::FromStr for WriteMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "staged" | "sandbox" | "preview" => Ok(WriteMode::Staged),
            "direct" | "direct-write" | "direct_write" => Ok(WriteMode::Direct),
            other => Err(ConfigError::ValidationError(format!(
                "unknown sandbox mode '{other}' (expected 'staged' or 'direct')"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default)]
    pub mode: WriteMode,

    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,

    #[serde(default = "default_max_read_chars")]
    pub max_read_chars: usize,

    /// Undo snapshots kept per file in direct-write mode
    #[serde(default = "default_max_edit_history")]
    pub max_edit_history: usize,
}

fn default_max_file_bytes() -> u64 {
    10 * 1024 * 1024
}
fn default_max_read_chars() -> usize {
    20_000
}
fn default_max_edit_history() -> usize {
    20
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            mode: WriteMode::default(),
            max_file_bytes: default_max_file_bytes(),
            max_read_chars: default_max_read_chars(),
            max_edit_history: default_max_edit_history(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Tools the model may call. Empty = every registered tool.
    #[serde(default)]
    pub allow: Vec<String>,

    /// Tools the model may never call. Wins over `allow`.
    #[serde(default)]
    pub deny: Vec<String>,

    #[serde(default)]
    pub run_command_enabled: bool,

    /// Serialized argument size above which a call is rejected
    #[serde(default = "default_max_args_chars")]
    pub max_args_chars: usize,
}

fn default_max_args_chars() -> usize {
    12_000
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            allow: Vec::new(),
            deny: Vec::new(),
            run_command_enabled: false,
            max_args_chars: default_max_args_chars(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_timeout_secs() -> u64 {
    120
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration for a workspace (`<workspace>/.codeagent/config.toml`).
    ///
    /// Environment variables override file values:
    /// - `CODEAGENT_API_KEY` (then `OPENAI_API_KEY`)
    /// - `CODEAGENT_API_URL`, `CODEAGENT_MODEL`
    /// - `CODEAGENT_SANDBOX_MODE`
    /// - `CODEAGENT_MAX_TURNS`, `CODEAGENT_MAX_TOOL_CALLS`
    pub fn load(workspace: &Path) -> Result<Self, ConfigError> {
        Self::load_with(&Self::config_path(workspace), |key| std::env::var(key).ok())
    }

    /// Load from an explicit file, applying overrides from `lookup`.
    pub fn load_with(
        path: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, without overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// `<workspace>/.codeagent/config.toml`
    pub fn config_path(workspace: &Path) -> PathBuf {
        workspace.join(STATE_DIR).join("config.toml")
    }

    fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(key) = lookup("CODEAGENT_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            self.model.api_key = Some(key);
        }
        if let Some(url) = lookup("CODEAGENT_API_URL") {
            self.model.api_url = url;
        }
        if let Some(model) = lookup("CODEAGENT_MODEL") {
            self.model.model = model;
        }
        if let Some(mode) = lookup("CODEAGENT_SANDBOX_MODE") {
            self.sandbox.mode = mode.parse()?;
        }
        if let Some(turns) = lookup("CODEAGENT_MAX_TURNS") {
            self.agent.max_turns = parse_count("CODEAGENT_MAX_TURNS", &turns)?;
        }
        if let Some(calls) = lookup("CODEAGENT_MAX_TOOL_CALLS") {
            self.agent.max_tool_calls = parse_count("CODEAGENT_MAX_TOOL_CALLS", &calls)?;
        }
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.temperature < 0.0 || self.model.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "model.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_turns == 0 {
            return Err(ConfigError::ValidationError("agent.max_turns must be > 0".into()));
        }

        if self.agent.max_prompt_chars < 1000 {
            return Err(ConfigError::ValidationError(
                "agent.max_prompt_chars must be at least 1000".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.agent.low_efficiency_ratio) {
            return Err(ConfigError::ValidationError(
                "agent.low_efficiency_ratio must be between 0.0 and 1.0".into(),
            ));
        }

        if self.sandbox.max_edit_history == 0 {
            return Err(ConfigError::ValidationError(
                "sandbox.max_edit_history must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.model.api_key.is_some()
    }

    /// Render the effective configuration as TOML (for `codeagent config`).
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let mut shown = self.clone();
        if shown.model.api_key.is_some() {
            shown.model.api_key = Some("[REDACTED]".into());
        }
        toml::to_string_pretty(&shown).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}

fn parse_count(var: &str, raw: &str) -> Result<usize, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::ValidationError(format!("{var} must be a non-negative integer, got '{raw}'")))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.agent.max_turns, 30);
        assert_eq!(config.agent.max_tool_calls, 18);
        assert_eq!(config.agent.max_prompt_chars, 24_000);
        assert_eq!(config.sandbox.mode, WriteMode::Staged);
        assert!(!config.tools.run_command_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.agent.max_facts, config.agent.max_facts);
        assert_eq!(parsed.sandbox.max_file_bytes, config.sandbox.max_file_bytes);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.model.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().agent.max_turns, 30);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[agent]\nmax_tool_calls = 5\n\n[sandbox]\nmode = \"direct\"\n").unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.agent.max_tool_calls, 5);
        assert_eq!(config.agent.max_turns, 30);
        assert_eq!(config.sandbox.mode, WriteMode::Direct);
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[agent\nmax_turns = ").unwrap();
        match AppConfig::load_from(&path).unwrap_err() {
            ConfigError::ParseError { .. } => {}
            other => panic!("Expected ParseError, got: {other}"),
        }
    }

    #[test]
    fn env_overrides_win_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[model]\nmodel = \"from-file\"\n").unwrap();

        let env: HashMap<&str, &str> = HashMap::from([
            ("CODEAGENT_MODEL", "from-env"),
            ("OPENAI_API_KEY", "sk-test"),
            ("CODEAGENT_SANDBOX_MODE", "direct"),
            ("CODEAGENT_MAX_TURNS", "7"),
        ]);
        let config =
            AppConfig::load_with(&path, |k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.model.model, "from-env");
        assert_eq!(config.model.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.sandbox.mode, WriteMode::Direct);
        assert_eq!(config.agent.max_turns, 7);
    }

    #[test]
    fn bad_env_value_is_validation_error() {
        let result = AppConfig::load_with(Path::new("/nonexistent/config.toml"), |k| {
            (k == "CODEAGENT_MAX_TOOL_CALLS").then(|| "many".to_string())
        });
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn api_key_redacted_in_debug_and_toml() {
        let mut config = AppConfig::default();
        config.model.api_key = Some("sk-secret-123".into());
        assert!(!format!("{config:?}").contains("sk-secret-123"));
        assert!(!config.to_toml().unwrap().contains("sk-secret-123"));
    }

    #[test]
    fn write_mode_parses_aliases() {
        assert_eq!("direct-write".parse::<WriteMode>().unwrap(), WriteMode::Direct);
        assert_eq!("Staged".parse::<WriteMode>().unwrap(), WriteMode::Staged);
        assert!("nope".parse::<WriteMode>().is_err());
    }
}
