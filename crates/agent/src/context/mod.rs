//! What the model sees each turn.
//!
//! [`files`] loads the long-lived context (memory files, agent
//! instructions, IDE snapshot), [`render`] turns tool observations into
//! prompt text, and [`prompt`] assembles everything under a char budget.

pub mod files;
pub mod prompt;
pub mod render;

pub use files::ContextFiles;
pub use prompt::{HistoryEntry, PromptBudget, PromptInput, build_force_final_prompt, build_prompt};
pub use render::{Detail, render_observation};
