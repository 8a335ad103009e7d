//! The ReAct loop that drives a coding task to a final answer.
//!
//! Each turn the model sees one prompt (rules, tools, context files, facts,
//! pending changes, plan, recent history) and replies with a single JSON
//! object: a tool call or a final answer. Tool calls go through a
//! [`ToolDispatcher`](codeagent_core::ToolDispatcher); their observations
//! feed the next prompt.
//!
//! - [`facts`]: bounded ledger of verified facts
//! - [`plan`]: coarse plan state and stall tracking
//! - [`signature`]: stable tool-call signatures for loop detection
//! - [`parse`]: model output extraction and classification
//! - [`evidence`]: evidence tracking and answer attribution
//! - [`context`]: context files, observation rendering, prompt assembly
//! - [`patterns`]: the loop controller itself

pub mod context;
pub mod evidence;
pub mod facts;
pub mod parse;
pub mod patterns;
pub mod plan;
pub mod signature;

pub use context::{ContextFiles, Detail, HistoryEntry, PromptBudget, PromptInput, render_observation};
pub use evidence::{EvidenceKind, EvidenceTracker};
pub use facts::{Fact, FactLedger};
pub use parse::{Decision, ParseError, ProtocolError};
pub use patterns::{AgentLimits, EditMetrics, ReActLoopController, RunOutcome, StopReason};
pub use plan::{Phase, PlanState};
