//! OpenAI-compatible model client.
//!
//! Works with OpenAI, OpenRouter, Ollama, vLLM, LiteLLM proxies and any
//! other endpoint exposing `/chat/completions`. The loop sends one user
//! message per turn and reads back the first choice's text.

use async_trait::async_trait;
use codeagent_config::ModelConfig;
use codeagent_core::error::ModelError;
use codeagent_core::model::ModelClient;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const MAX_ERROR_BODY_CHARS: usize = 2000;

/// A chat-completions client bound to one model.
pub struct OpenAiCompatClient {
    name: String,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ModelError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model: model.into(),
            temperature: 0.2,
            client,
        })
    }

    /// Build a client from the `[model]` config section.
    pub fn from_config(config: &ModelConfig) -> Result<Self, ModelError> {
        let client = Self::new(
            "openai-compat",
            config.api_url.clone(),
            config.api_key.clone(),
            config.model.clone(),
            Duration::from_secs(config.timeout_secs.max(1)),
        )?;
        Ok(client.with_temperature(config.temperature))
    }

    /// Local Ollama endpoint (no key needed).
    pub fn ollama(model: impl Into<String>, base_url: Option<&str>) -> Result<Self, ModelError> {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            None,
            model,
            Duration::from_secs(600),
        )
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body<'a>(&'a self, prompt: &'a str) -> ApiRequest<'a> {
        ApiRequest {
            model: &self.model,
            messages: vec![ApiMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            stream: false,
        }
    }
}

fn truncate_body(body: &str) -> String {
    codeagent_core::text::truncate_with(body, MAX_ERROR_BODY_CHARS, "...")
}

/// First choice's text, or an error when the response has none.
fn extract_content(response: ApiResponse) -> Result<String, ModelError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ModelError::ApiError {
            status_code: 200,
            message: "No choices in response".into(),
        })?;
    Ok(choice.message.content.unwrap_or_default())
}

#[async_trait]
impl ModelClient for OpenAiCompatClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, prompt: &str) -> Result<String, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(client = %self.name, model = %self.model, prompt_chars = prompt.chars().count(), "Sending chat request");

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&self.request_body(prompt));
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ModelError::Timeout(e.to_string())
            } else {
                ModelError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if status == 429 {
            return Err(ModelError::RateLimited { retry_after_secs: 5 });
        }
        if status == 401 || status == 403 {
            return Err(ModelError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            warn!(status, body = %truncate_body(&body), "Model endpoint returned error");
            return Err(ModelError::ApiError {
                status_code: status,
                message: truncate_body(&body),
            });
        }

        let parsed: ApiResponse = response.json().await.map_err(|e| ModelError::ApiError {
            status_code: status,
            message: format!("Failed to parse response: {e}"),
        })?;
        let content = extract_content(parsed)?;
        debug!(client = %self.name, response_chars = content.chars().count(), "Chat response received");
        Ok(content)
    }
}

// --- OpenAI API wire types ---

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    content: Option<String>,
}
