//! Agent patterns. Only the ReAct loop lives here for now.

pub mod react;

pub use react::{AgentLimits, EditMetrics, ReActLoopController, RunOutcome, StopReason};

#[cfg(test)]
pub(crate) mod test_helpers;
