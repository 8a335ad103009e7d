//! Model client trait: the abstraction over the language model.
//!
//! The loop sends one fully assembled prompt per call and expects raw
//! text back. The text should contain a single JSON object, possibly
//! wrapped in prose or markdown fences; stripping that is the caller's job.

use async_trait::async_trait;

use crate::error::ModelError;

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Human-readable client name, used in logs.
    fn name(&self) -> &str;

    /// Send a prompt and wait for the complete response text.
    async fn chat(&self, prompt: &str) -> Result<String, ModelError>;
}
