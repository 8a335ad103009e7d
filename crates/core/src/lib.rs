//! # codeagent core
//!
//! Domain types, traits, and error definitions shared by every codeagent crate.
//! The loop controller, the filesystem sandbox and the model clients all
//! depend inward on this crate and never on each other's internals.
//!
//! ## Seams
//!
//! - [`ModelClient`]: one blocking `chat(prompt) -> text` call per turn
//! - [`Tool`] / [`ToolRegistry`]: the capabilities the model may invoke
//! - [`ToolDispatcher`]: name + version + args in, observation JSON out
//! - [`EventBus`]: broadcast of pending-change and run events

pub mod error;
pub mod event;
pub mod model;
pub mod observation;
pub mod text;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ModelError, Result, ToolError};
pub use event::{DomainEvent, EventBus};
pub use model::ModelClient;
pub use observation::{Field, is_tool_error};
pub use tool::{Tool, ToolContext, ToolDispatcher, ToolRegistry, ToolResult, ToolSpec};
