//! Model clients for codeagent.
//!
//! Both clients implement [`codeagent_core::ModelClient`]: one prompt in,
//! one completion text out.

pub mod openai_compat;
pub mod scripted;

pub use openai_compat::OpenAiCompatClient;
pub use scripted::{ScriptedModel, parse_script};
