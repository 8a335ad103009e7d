//! Shared test helpers for loop tests.

use async_trait::async_trait;
use codeagent_core::error::ModelError;
use codeagent_core::model::ModelClient;
use codeagent_core::tool::{ToolContext, ToolDispatcher, ToolSpec};
use serde_json::{Value, json};
use std::sync::Mutex;

/// A mock model that returns a sequence of scripted responses.
///
/// Each call to `chat` returns the next response in the queue.
/// Panics if more calls are made than responses provided.
pub struct SequentialMockModel {
    responses: Vec<String>,
    call_count: Mutex<usize>,
    prompts: Mutex<Vec<String>>,
}

impl SequentialMockModel {
    pub fn new<S: Into<String>>(responses: Vec<S>) -> Self {
        Self {
            responses: responses.into_iter().map(Into::into).collect(),
            call_count: Mutex::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for SequentialMockModel {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn chat(&self, prompt: &str) -> Result<String, ModelError> {
        let mut count = self.call_count.lock().unwrap();
        if *count >= self.responses.len() {
            panic!(
                "SequentialMockModel: no more responses (call #{}, have {})",
                *count,
                self.responses.len()
            );
        }
        self.prompts.lock().unwrap().push(prompt.to_string());
        let response = self.responses[*count].clone();
        *count += 1;
        Ok(response)
    }
}

type Responder = Box<dyn Fn(&str, &Value) -> String + Send + Sync>;

/// A dispatcher that records every call and answers with a closure.
pub struct RecordingDispatcher {
    specs: Vec<ToolSpec>,
    responder: Responder,
    calls: Mutex<Vec<(String, Value)>>,
}

impl RecordingDispatcher {
    pub fn new(responder: impl Fn(&str, &Value) -> String + Send + Sync + 'static) -> Self {
        Self {
            specs: ["READ_FILE", "GREP", "LIST_FILES", "EDIT_FILE", "SEARCH_KNOWLEDGE"]
                .iter()
                .map(|n| ToolSpec::new(*n, "v1"))
                .collect(),
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every call succeeds with an empty `ok` envelope.
    pub fn ok() -> Self {
        Self::new(|tool, args| ok_observation(tool, args, json!({})))
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ToolDispatcher for RecordingDispatcher {
    async fn execute(&self, tool: &str, _version: Option<&str>, args: &Value, _ctx: &ToolContext) -> String {
        self.calls.lock().unwrap().push((tool.to_string(), args.clone()));
        (self.responder)(tool, args)
    }

    fn list_tool_specs(&self) -> Vec<ToolSpec> {
        self.specs.clone()
    }

    fn is_run_command_enabled(&self) -> bool {
        false
    }
}

pub fn ok_observation(tool: &str, args: &Value, result: Value) -> String {
    json!({"tool": tool, "version": "v1", "status": "ok", "error": null, "args": args, "result": result}).to_string()
}

pub fn error_observation(tool: &str, code: &str) -> String {
    json!({"tool": tool, "version": "v1", "status": "error", "error": code, "result": null}).to_string()
}

/// A model response asking for one tool call.
pub fn tool_call(tool: &str, args: Value) -> String {
    json!({"thought": format!("use {tool}"), "type": "tool", "tool": tool, "args": args, "facts": {}}).to_string()
}

/// A model response carrying the final answer.
pub fn final_answer(text: &str) -> String {
    json!({"thought": "done", "type": "final", "finalAnswer": text, "facts": {}}).to_string()
}
