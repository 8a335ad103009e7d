//! Replay client: answers each turn with the next response from a script.
//!
//! Used for offline runs (`codeagent run --script FILE`) and reproducible
//! demos. A script file is either a JSON array (strings are used as-is,
//! anything else is re-serialized) or plain text with responses separated
//! by lines containing only `---`.

use async_trait::async_trait;
use codeagent_core::error::ModelError;
use codeagent_core::model::ModelClient;
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

pub struct ScriptedModel {
    responses: Vec<String>,
    cursor: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses,
            cursor: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ModelError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ModelError::NotConfigured(format!("cannot read script {}: {e}", path.display())))?;
        Ok(Self::new(parse_script(&text)))
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    /// Responses handed out so far.
    pub fn calls(&self) -> usize {
        self.cursor.load(Ordering::SeqCst).min(self.responses.len())
    }

    /// Every prompt received, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

/// Split a script file into responses.
pub fn parse_script(text: &str) -> Vec<String> {
    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(text) {
        return items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => s,
                other => other.to_string(),
            })
            .collect();
    }
    let mut responses = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if line.trim() == "---" {
            responses.push(std::mem::take(&mut current));
            continue;
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    responses.push(current);
    responses.retain(|r| !r.trim().is_empty());
    responses
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, prompt: &str) -> Result<String, ModelError> {
        match self.prompts.lock() {
            Ok(mut prompts) => prompts.push(prompt.to_string()),
            Err(poisoned) => poisoned.into_inner().push(prompt.to_string()),
        }
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst);
        debug!(call = idx + 1, total = self.responses.len(), "Scripted response");
        self.responses
            .get(idx)
            .cloned()
            .ok_or(ModelError::Exhausted(self.responses.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_array_script() {
        let script = r#"["plain text", {"type":"final","content":"done"}]"#;
        let responses = parse_script(script);
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0], "plain text");
        let second: Value = serde_json::from_str(&responses[1]).unwrap();
        assert_eq!(second["type"], "final");
    }

    #[test]
    fn separator_script() {
        let script = "{\"type\":\"tool\"}\n---\n{\"type\":\"final\",\n\"content\":\"ok\"}\n---\n";
        let responses = parse_script(script);
        assert_eq!(responses, vec!["{\"type\":\"tool\"}", "{\"type\":\"final\",\n\"content\":\"ok\"}"]);
    }

    #[tokio::test]
    async fn replays_in_order_then_exhausts() {
        let model = ScriptedModel::new(vec!["a".into(), "b".into()]);
        assert_eq!(model.chat("p1").await.unwrap(), "a");
        assert_eq!(model.chat("p2").await.unwrap(), "b");
        assert!(matches!(model.chat("p3").await, Err(ModelError::Exhausted(2))));
        assert_eq!(model.calls(), 2);
        assert_eq!(model.prompts(), vec!["p1", "p2", "p3"]);
    }

    #[test]
    fn from_file_reads_script() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.json");
        std::fs::write(&path, r#"["x"]"#).unwrap();
        assert_eq!(ScriptedModel::from_file(&path).unwrap().len(), 1);
        assert!(ScriptedModel::from_file(&dir.path().join("missing")).is_err());
    }
}
