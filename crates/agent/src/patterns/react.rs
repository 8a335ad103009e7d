//! ReAct loop controller: Thought → Tool → Observation until a final answer.
//!
//! Each turn builds a prompt, asks the model for one JSON decision and
//! either returns the answer or runs one tool through the dispatcher. The
//! controller owns the guards around that cycle:
//!
//! - a tool-call budget and a turn budget, both ending in a forced answer
//! - repeated-call detection serving the cached observation instead of
//!   re-running a tool, with a content check for paginated `READ_FILE`
//! - backoff for a tool that keeps failing, and an escalation after too
//!   many consecutive failures
//! - a search-efficiency check for `SEARCH_KNOWLEDGE`
//!
//! Protocol violations end the run with the violation text as the answer.
//! Only a failed model call surfaces as `Err`.

use chrono::Utc;
use codeagent_config::AgentConfig;
use codeagent_core::event::{DomainEvent, EventBus};
use codeagent_core::model::ModelClient;
use codeagent_core::observation::{Field, is_error_value, is_tool_error};
use codeagent_core::text::truncate;
use codeagent_core::tool::{DEFAULT_TOOL_VERSION, ToolContext, ToolDispatcher, ToolSpec, canonical_tool_name};
use codeagent_tools::{PendingChange, Sandbox};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::context::files::ContextFiles;
use crate::context::prompt::{HistoryEntry, PromptBudget, PromptInput, build_force_final_prompt, build_prompt};
use crate::context::render::{Detail, render_observation};
use crate::evidence::{EvidenceKind, EvidenceTracker, finalize_answer, hit_signature};
use crate::facts::{Fact, FactLedger};
use crate::parse::{Decision, ProtocolError, classify, lenient_final_answer, parse_json_object};
use crate::plan::{PlanState, is_modification_tool};
use crate::signature::{observation_digest, tool_signature};

const MAX_THOUGHT_CHARS: usize = 300;
const MAX_READ_FILES: usize = 20;
/// Consecutive repeats of one SEARCH_KNOWLEDGE query before it counts as a loop.
const REPEATED_QUERY_LIMIT: usize = 2;

/// Hard caps for one run.
#[derive(Debug, Clone)]
pub struct AgentLimits {
    pub max_turns: usize,
    pub max_tool_calls: usize,
    pub tool_backoff_threshold: usize,
    pub max_consecutive_errors: usize,
    pub max_parse_retries: usize,
    pub max_prompt_chars: usize,
    pub history_tail: usize,
    pub max_facts: usize,
    pub read_loop_limit: usize,
    pub low_efficiency_streak: usize,
    pub low_efficiency_ratio: f64,
    pub max_chat_history_chars: usize,
}

impl From<&AgentConfig> for AgentLimits {
    fn from(config: &AgentConfig) -> Self {
        Self {
            max_turns: config.max_turns,
            max_tool_calls: config.max_tool_calls,
            tool_backoff_threshold: config.tool_backoff_threshold,
            max_consecutive_errors: config.max_consecutive_errors,
            max_parse_retries: config.max_parse_retries,
            max_prompt_chars: config.max_prompt_chars,
            history_tail: config.history_tail,
            max_facts: config.max_facts,
            read_loop_limit: config.read_loop_limit,
            low_efficiency_streak: config.low_efficiency_streak,
            low_efficiency_ratio: config.low_efficiency_ratio,
            max_chat_history_chars: config.max_chat_history_chars,
        }
    }
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self::from(&AgentConfig::default())
    }
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model answered.
    Final,
    /// Malformed or incomplete model output.
    ProtocolError,
    ToolBudget,
    /// The same file range was read too often.
    ReadLoop,
    /// A repeated call landed on the last turn.
    RepeatedCall,
    ConsecutiveErrors,
    RepeatedQuery,
    TurnBudget,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Final => "final",
            StopReason::ProtocolError => "protocol_error",
            StopReason::ToolBudget => "tool_budget",
            StopReason::ReadLoop => "read_loop",
            StopReason::RepeatedCall => "repeated_call",
            StopReason::ConsecutiveErrors => "consecutive_errors",
            StopReason::RepeatedQuery => "repeated_query",
            StopReason::TurnBudget => "turn_budget",
        }
    }

    /// Whether the answer was synthesized by the "answer now" prompt.
    pub fn is_forced(&self) -> bool {
        !matches!(self, StopReason::Final | StopReason::ProtocolError)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Files confirmed or discarded through `APPLY_PENDING_DIFF` during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EditMetrics {
    pub applied: usize,
    pub rejected: usize,
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub answer: String,
    pub turns: usize,
    pub tool_calls: usize,
    pub stop_reason: StopReason,
    pub facts: Vec<Fact>,
    pub plan: PlanState,
    pub edits: EditMetrics,
    pub evidence_sources: Vec<String>,
    /// Changes still staged for this sandbox when the run ended.
    pub pending_changes: Vec<PendingChange>,
}

/// Mutable state of one run. Never shared between runs.
struct RunState {
    goal: String,
    files: ContextFiles,
    facts: FactLedger,
    plan: PlanState,
    evidence: EvidenceTracker,
    history: Vec<HistoryEntry>,
    pinned: Option<usize>,
    read_files: Vec<String>,
    tool_calls: usize,
    signature_counts: HashMap<String, usize>,
    last_signature: Option<String>,
    cached: HashMap<String, String>,
    read_digests: HashMap<String, String>,
    consecutive_errors: usize,
    last_failed_tool: Option<String>,
    last_query: Option<String>,
    same_query_count: usize,
    seen_hits: HashSet<String>,
    low_efficiency_run: usize,
    edits: EditMetrics,
}

impl RunState {
    fn new(goal: &str, files: ContextFiles, max_facts: usize) -> Self {
        let mut state = Self {
            goal: goal.to_string(),
            files,
            facts: FactLedger::new(max_facts),
            plan: PlanState::from_goal(goal),
            evidence: EvidenceTracker::new(),
            history: Vec::new(),
            pinned: None,
            read_files: Vec::new(),
            tool_calls: 0,
            signature_counts: HashMap::new(),
            last_signature: None,
            cached: HashMap::new(),
            read_digests: HashMap::new(),
            consecutive_errors: 0,
            last_failed_tool: None,
            last_query: None,
            same_query_count: 0,
            seen_hits: HashSet::new(),
            low_efficiency_run: 0,
            edits: EditMetrics::default(),
        };
        state.record_context_evidence();
        state
    }

    fn record_context_evidence(&mut self) {
        if !self.files.project_memory.is_empty() {
            self.evidence.add("PROJECT_MEMORY", EvidenceKind::Memory);
        }
        if !self.files.long_term_memory.is_empty() {
            self.evidence.add("LONG_TERM_MEMORY", EvidenceKind::Memory);
            self.facts
                .put("LongTermMemory", "Loaded long-term memory files (content is in the prompt)");
        }
        if !self.files.agents_md.is_empty() {
            self.evidence.add("AGENTS_MD", EvidenceKind::Context);
            self.facts.put("AGENTS.md", "Loaded AGENTS.md (agent instructions)");
        }
        if let Some(path) = &self.files.ide_path {
            if !self.files.ide_context.is_empty() {
                let path = path.display().to_string();
                self.evidence.add(format!("IDE_CONTEXT:{path}"), EvidenceKind::Memory);
                self.facts
                    .put("IDEContext", &format!("Loaded IDE structure snapshot from {path}"));
            }
        }
    }

    fn push_observation(&mut self, observation: String) {
        self.plan
            .record_observation(&render_observation(&observation, Detail::Compact));
        self.history.push(HistoryEntry::Observation(observation));
        self.pinned = Some(self.history.len() - 1);
    }

    fn capture_facts(&mut self, facts: Option<&Value>, required: bool) {
        match facts.filter(|f| f.is_object()) {
            Some(facts) => {
                self.facts.merge_json(facts);
            }
            None if required => warn!("Protocol violation: tool call without facts"),
            None => {}
        }
    }

    fn note_read_file(&mut self, obs: &Value) {
        let Some(path) = Field::of(obs, "result")
            .value()
            .and_then(|r| Field::of(r, "filePath").non_empty_str())
        else {
            return;
        };
        if !self.read_files.iter().any(|p| p == path) {
            if self.read_files.len() >= MAX_READ_FILES {
                self.read_files.remove(0);
            }
            self.read_files.push(path.to_string());
        }
    }

    /// Share of hits not seen in earlier searches. No hits is 0, an
    /// unreadable observation counts as fully new.
    fn search_efficiency(&mut self, obs: Option<&Value>) -> f64 {
        let Some(obs) = obs else {
            return 1.0;
        };
        let hits = Field::of(obs, "result")
            .value()
            .and_then(|r| Field::of(r, "hits").value())
            .and_then(Value::as_array);
        let Some(hits) = hits else {
            return 1.0;
        };
        if hits.is_empty() {
            return 0.0;
        }
        let fresh = hits
            .iter()
            .filter(|hit| self.seen_hits.insert(hit_signature(hit)))
            .count();
        fresh as f64 / hits.len() as f64
    }
}

fn synthetic(tool: &str, error: &str, hint: &str, extra: Value) -> String {
    let mut obs = json!({"tool": tool, "error": error, "hint": hint});
    if let (Some(obs), Value::Object(extra)) = (obs.as_object_mut(), extra) {
        for (k, v) in extra {
            obs.insert(k, v);
        }
    }
    obs.to_string()
}

/// The ReAct loop bound to one model, one dispatcher and one sandbox.
pub struct ReActLoopController {
    model: Arc<dyn ModelClient>,
    dispatcher: Arc<dyn ToolDispatcher>,
    sandbox: Sandbox,
    limits: AgentLimits,
    chat_history: Vec<String>,
    ide_context_path: Option<PathBuf>,
    event_bus: Option<Arc<EventBus>>,
}

impl ReActLoopController {
    pub fn new(
        model: Arc<dyn ModelClient>,
        dispatcher: Arc<dyn ToolDispatcher>,
        sandbox: Sandbox,
        limits: AgentLimits,
    ) -> Self {
        Self {
            model,
            dispatcher,
            sandbox,
            limits,
            chat_history: Vec::new(),
            ide_context_path: None,
            event_bus: None,
        }
    }

    /// Prior conversation lines, oldest first.
    pub fn with_chat_history(mut self, lines: Vec<String>) -> Self {
        self.chat_history = lines;
        self
    }

    pub fn with_ide_context(mut self, path: impl Into<PathBuf>) -> Self {
        self.ide_context_path = Some(path.into());
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn limits(&self) -> &AgentLimits {
        &self.limits
    }

    fn tool_context(&self) -> ToolContext {
        let ctx = ToolContext::new(self.sandbox.root());
        match self.sandbox.session() {
            Some(session) => ctx.with_session(session),
            None => ctx,
        }
    }

    fn budget(&self) -> PromptBudget {
        PromptBudget {
            max_prompt_chars: self.limits.max_prompt_chars,
            history_tail: self.limits.history_tail,
            max_chat_history_chars: self.limits.max_chat_history_chars,
        }
    }

    fn prompt(&self, state: &RunState, specs: &[ToolSpec], run_command_enabled: bool, force_final: bool) -> String {
        let pending = self.sandbox.pending_changes();
        let input = PromptInput {
            goal: &state.goal,
            tool_specs: specs,
            run_command_enabled,
            files: &state.files,
            facts: &state.facts,
            pending: &pending,
            read_files: &state.read_files,
            plan: &state.plan,
            chat_history: &self.chat_history,
            history: &state.history,
            pinned: state.pinned,
        };
        if force_final {
            build_force_final_prompt(&input, &self.budget())
        } else {
            build_prompt(&input, &self.budget())
        }
    }

    /// Run to completion and return the answer text.
    pub async fn run(&self, goal: &str) -> codeagent_core::Result<String> {
        Ok(self.run_detailed(goal).await?.answer)
    }

    /// Run to completion and return the answer plus run statistics.
    pub async fn run_detailed(&self, goal: &str) -> codeagent_core::Result<RunOutcome> {
        let specs = self.dispatcher.list_tool_specs();
        let run_command_enabled = self.dispatcher.is_run_command_enabled();
        let files = ContextFiles::load(&self.sandbox, self.ide_context_path.as_deref(), goal);
        let mut state = RunState::new(goal, files, self.limits.max_facts);
        let ctx = self.tool_context();
        let max_turns = self.limits.max_turns;

        info!(
            model = %self.model.name(),
            max_turns,
            max_tool_calls = self.limits.max_tool_calls,
            goal = %truncate(goal, 200),
            "ReAct loop starting"
        );

        for turn in 0..max_turns {
            let turns = turn + 1;
            let last_turn = turn + 1 == max_turns;
            debug!(turn = turns, "ReAct turn");

            let prompt = self.prompt(&state, &specs, run_command_enabled, false);
            let (node, raw) = match self.parse_with_retry(&prompt).await? {
                Ok(parsed) => parsed,
                Err(violation) => {
                    warn!(error = %violation, "Model output unparsable");
                    return Ok(self.finish(state, violation.to_string(), turns, StopReason::ProtocolError));
                }
            };

            let decision = match classify(&node, &raw) {
                Ok(decision) => decision,
                Err(violation) => {
                    warn!(error = %violation, "Protocol violation");
                    return Ok(self.finish(state, violation.to_string(), turns, StopReason::ProtocolError));
                }
            };

            let (tool, version, args) = match decision {
                Decision::Final { answer, thought, facts } => {
                    if let Some(thought) = thought {
                        state.history.push(HistoryEntry::Thought(truncate(&thought, MAX_THOUGHT_CHARS).to_string()));
                    }
                    state.capture_facts(facts.as_ref(), false);
                    let answer = finalize_answer(&answer, &state.evidence);
                    return Ok(self.finish(state, answer, turns, StopReason::Final));
                }
                Decision::Tool { tool, version, args, thought, facts } => {
                    if let Some(thought) = thought {
                        state.history.push(HistoryEntry::Thought(truncate(&thought, MAX_THOUGHT_CHARS).to_string()));
                    }
                    state.capture_facts(facts.as_ref(), true);
                    let version = version.unwrap_or_else(|| DEFAULT_TOOL_VERSION.to_string());
                    (canonical_tool_name(&tool), version, args)
                }
            };

            let signature = tool_signature(&tool, &version, &args);
            state.history.push(HistoryEntry::ToolCall {
                signature: signature.clone(),
                args: args.clone(),
            });

            state.tool_calls += 1;
            if state.tool_calls > self.limits.max_tool_calls {
                warn!(tool = %tool, max_tool_calls = self.limits.max_tool_calls, "Tool budget exceeded");
                state.push_observation(synthetic(
                    &tool,
                    "tool_budget_exceeded",
                    "Tool call budget exhausted. Answer from the facts gathered so far.",
                    json!({"maxToolCalls": self.limits.max_tool_calls, "args": args}),
                ));
                return self.force_final(state, &specs, run_command_enabled, turns, StopReason::ToolBudget).await;
            }

            let count = {
                let count = state.signature_counts.entry(signature.clone()).or_insert(0);
                *count += 1;
                *count
            };

            if tool == "READ_FILE" && count >= self.limits.read_loop_limit {
                warn!(signature = %truncate(&signature, 200), count, "Repeated read of the same range");
                state.plan.record_action(&tool, &signature, true);
                state.push_observation(synthetic(
                    &tool,
                    "repeated_read_range",
                    "This file range was already read several times. Use the content you have or read a different range.",
                    json!({"signature": signature, "count": count}),
                ));
                return self.force_final(state, &specs, run_command_enabled, turns, StopReason::ReadLoop).await;
            }

            let mut is_loop = count >= 2 || state.last_signature.as_deref() == Some(signature.as_str());
            let mut fresh: Option<String> = None;
            if is_loop && tool == "READ_FILE" {
                // a paginated or edited file reads differently; only identical content is a loop
                let observation = self.dispatcher.execute(&tool, Some(&version), &args, &ctx).await;
                let digest = serde_json::from_str::<Value>(&observation).ok().map(|v| observation_digest(&v));
                if digest.is_none() || digest.as_ref() != state.read_digests.get(&signature) {
                    is_loop = false;
                    fresh = Some(observation);
                }
            }

            state.plan.record_action(&tool, &signature, is_loop);

            if is_loop {
                debug!(signature = %truncate(&signature, 200), "Repeated tool call served from cache");
                let observation = match state.cached.get(&signature).and_then(|c| serde_json::from_str::<Value>(c).ok()) {
                    Some(cached) => json!({
                        "tool": tool,
                        "signature": signature,
                        "cached": true,
                        "args": args,
                        "result": cached.get("result").cloned().unwrap_or(Value::Null),
                        "error": cached.get("error").cloned().unwrap_or(Value::Null),
                        "hint": "Repeated call with same tool+args, cached result returned. Change the arguments or answer.",
                    })
                    .to_string(),
                    None => synthetic(
                        &tool,
                        "repeated_tool_call",
                        "Repeated call with same tool+args. Change the arguments or answer.",
                        json!({"signature": signature}),
                    ),
                };
                state.push_observation(observation);
                state.last_signature = Some(signature);
                if last_turn {
                    return self.force_final(state, &specs, run_command_enabled, turns, StopReason::RepeatedCall).await;
                }
                continue;
            }

            if state.consecutive_errors >= self.limits.tool_backoff_threshold
                && state.last_failed_tool.as_deref() == Some(tool.as_str())
            {
                warn!(tool = %tool, errors = state.consecutive_errors, "Backing off failing tool");
                state.push_observation(synthetic(
                    &tool,
                    "tool_backoff",
                    "This tool failed repeatedly. Change the arguments or use a different tool.",
                    json!({"consecutiveErrors": state.consecutive_errors}),
                ));
                state.last_signature = Some(signature);
                if last_turn {
                    return self.force_final(state, &specs, run_command_enabled, turns, StopReason::TurnBudget).await;
                }
                continue;
            }

            let query = (tool == "SEARCH_KNOWLEDGE").then(|| Field::of(&args, "query").text().trim().to_string());

            let observation = match fresh {
                Some(observation) => observation,
                None => self.dispatcher.execute(&tool, Some(&version), &args, &ctx).await,
            };
            let failed = is_tool_error(&observation);
            let parsed = serde_json::from_str::<Value>(&observation).ok();
            info!(tool = %tool, turn = turns, success = !failed, "Tool executed");

            state.last_signature = Some(signature.clone());
            if let Some(obs) = &parsed {
                if tool == "READ_FILE" {
                    state.read_digests.insert(signature.clone(), observation_digest(obs));
                }
                if !is_error_value(obs) {
                    for (key, value) in state.evidence.record_observation(&tool, &args, obs) {
                        state.facts.put(&key, &value);
                    }
                    if tool == "READ_FILE" {
                        state.note_read_file(obs);
                    }
                    if is_modification_tool(&tool) {
                        state.files.refresh_ide_context(&self.sandbox, &state.goal);
                    }
                }
                if tool == "APPLY_PENDING_DIFF" {
                    let files = obs.get("applied").and_then(Value::as_array).map_or(0, Vec::len);
                    let rejected = obs
                        .get("result")
                        .and_then(|r| r.get("rejected"))
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    if rejected {
                        state.edits.rejected += files;
                    } else {
                        state.edits.applied += files;
                    }
                }
            }
            state.cached.insert(signature, observation.clone());

            if failed {
                state.consecutive_errors += 1;
                state.last_failed_tool = Some(tool.clone());
            } else {
                state.consecutive_errors = 0;
                state.last_failed_tool = None;
            }
            state.push_observation(observation);

            if let Some(query) = query {
                if !failed {
                    let ratio = state.search_efficiency(parsed.as_ref());
                    if ratio < self.limits.low_efficiency_ratio {
                        state.low_efficiency_run += 1;
                    } else {
                        state.low_efficiency_run = 0;
                    }
                    debug!(ratio, streak = state.low_efficiency_run, "Search efficiency");
                    if state.low_efficiency_run >= self.limits.low_efficiency_streak {
                        state.history.push(HistoryEntry::Note(
                            "HINT low_search_efficiency: recent searches mostly repeat known hits. Stop searching; READ_FILE or GREP the files already found, or answer.".into(),
                        ));
                    }
                }
                if !query.is_empty() && state.last_query.as_deref() == Some(query.as_str()) {
                    state.same_query_count += 1;
                } else {
                    state.same_query_count = 0;
                    state.last_query = Some(query.clone());
                }
                if state.same_query_count >= REPEATED_QUERY_LIMIT {
                    warn!(query = %query, count = state.same_query_count, "Repeated search query");
                    state.push_observation(synthetic(
                        &tool,
                        "repeated_query",
                        "Too many repeated search queries. Change keywords, use LIST_FILES, GREP or READ_FILE, or answer.",
                        json!({"query": query}),
                    ));
                    if state.evidence.is_sufficient(!state.facts.is_empty()) {
                        return self
                            .force_final(state, &specs, run_command_enabled, turns, StopReason::RepeatedQuery)
                            .await;
                    }
                }
            }

            if state.consecutive_errors >= self.limits.max_consecutive_errors {
                warn!(tool = %tool, errors = state.consecutive_errors, "Too many consecutive tool errors");
                state.push_observation(synthetic(
                    &tool,
                    "too_many_tool_errors",
                    "Too many tool errors. Switch strategy or answer from the facts you have.",
                    json!({"count": state.consecutive_errors}),
                ));
                if state.evidence.is_sufficient(!state.facts.is_empty()) || last_turn {
                    return self
                        .force_final(state, &specs, run_command_enabled, turns, StopReason::ConsecutiveErrors)
                        .await;
                }
                continue;
            }

            if last_turn {
                warn!(tool = %tool, "Last turn spent on a tool call");
                return self.force_final(state, &specs, run_command_enabled, turns, StopReason::TurnBudget).await;
            }
        }

        warn!(max_turns, "Turn budget exhausted");
        self.force_final(state, &specs, run_command_enabled, max_turns, StopReason::TurnBudget).await
    }

    /// Call the model until its output parses, re-prompting with the parse
    /// error. The inner `Err` is the protocol violation after the last retry.
    async fn parse_with_retry(
        &self,
        prompt: &str,
    ) -> codeagent_core::Result<Result<(Value, String), ProtocolError>> {
        let mut raw = self.model.chat(prompt).await?;
        let mut attempt = 0;
        loop {
            match parse_json_object(&raw) {
                Ok(node) => return Ok(Ok((node, raw))),
                Err(e) if attempt >= self.limits.max_parse_retries => {
                    return Ok(Err(ProtocolError::Unparsable {
                        attempts: attempt + 1,
                        reason: e.to_string(),
                    }));
                }
                Err(e) => {
                    attempt += 1;
                    debug!(attempt, error = %e, "Re-prompting for valid JSON");
                    let retry = format!(
                        "{prompt}\n\nYour output does not match JSON format. Error: {e}. Please re-output pure JSON that follows the Format above."
                    );
                    raw = self.model.chat(&retry).await?;
                }
            }
        }
    }

    /// Ask for an answer with tools off the table.
    async fn force_final(
        &self,
        state: RunState,
        specs: &[ToolSpec],
        run_command_enabled: bool,
        turns: usize,
        reason: StopReason,
    ) -> codeagent_core::Result<RunOutcome> {
        info!(reason = %reason, "Forcing final answer");
        let prompt = self.prompt(&state, specs, run_command_enabled, true);
        let answer = match self.model.chat(&prompt).await {
            Ok(raw) => finalize_answer(&lenient_final_answer(&raw), &state.evidence),
            Err(e) => {
                warn!(error = %e, "Forced final answer failed");
                format!("Failed to generate final answer: {e}")
            }
        };
        Ok(self.finish(state, answer, turns, reason))
    }

    fn finish(&self, mut state: RunState, answer: String, turns: usize, reason: StopReason) -> RunOutcome {
        if reason == StopReason::ProtocolError {
            state.plan.mark_failed();
        } else {
            state.plan.mark_done();
        }
        info!(
            turns,
            tool_calls = state.tool_calls,
            stop_reason = %reason,
            facts = state.facts.len(),
            "ReAct loop finished"
        );
        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::RunFinished {
                turns,
                tool_calls: state.tool_calls,
                stop_reason: reason.as_str().to_string(),
                timestamp: Utc::now(),
            });
        }
        RunOutcome {
            answer,
            turns,
            tool_calls: state.tool_calls,
            stop_reason: reason,
            facts: state.facts.snapshot(),
            plan: state.plan,
            edits: state.edits,
            evidence_sources: state.evidence.sources().to_vec(),
            pending_changes: self.sandbox.pending_changes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::test_helpers::*;
    use codeagent_config::{SandboxConfig, ToolsConfig};
    use codeagent_core::error::ModelError;
    use codeagent_security::ToolPolicy;
    use codeagent_tools::{ChangeType, PendingChangeStore, SandboxFactory, ToolExecutor, default_registry};

    fn sandbox() -> (tempfile::TempDir, Sandbox) {
        let dir = tempfile::tempdir().unwrap();
        let factory = SandboxFactory::new(Arc::new(PendingChangeStore::new()), SandboxConfig::default());
        let sandbox = factory.for_root(dir.path(), Some("s1"));
        (dir, sandbox)
    }

    fn controller(
        model: Arc<SequentialMockModel>,
        dispatcher: Arc<dyn ToolDispatcher>,
        sandbox: Sandbox,
        limits: AgentLimits,
    ) -> ReActLoopController {
        ReActLoopController::new(model, dispatcher, sandbox, limits)
    }

    fn read_ok(tool: &str, args: &Value) -> String {
        ok_observation(
            tool,
            args,
            json!({"filePath": "a.py", "startLine": 1, "endLine": 2, "content": "1→def foo():\n2→    pass\n", "truncated": false, "error": null}),
        )
    }

    #[test]
    fn limits_follow_config() {
        let config = AgentConfig {
            max_turns: 7,
            max_tool_calls: 4,
            ..AgentConfig::default()
        };
        let limits = AgentLimits::from(&config);
        assert_eq!(limits.max_turns, 7);
        assert_eq!(limits.max_tool_calls, 4);
        assert_eq!(AgentLimits::default().max_prompt_chars, 24_000);
    }

    #[tokio::test]
    async fn final_answer_on_first_turn() {
        let (_dir, sandbox) = sandbox();
        let model = Arc::new(SequentialMockModel::new(vec![final_answer("All good.")]));
        let dispatcher = Arc::new(RecordingDispatcher::ok());
        let outcome = controller(model.clone(), dispatcher.clone(), sandbox, AgentLimits::default())
            .run_detailed("What does this repo do?")
            .await
            .unwrap();
        assert_eq!(outcome.answer, "All good.");
        assert_eq!(outcome.stop_reason, StopReason::Final);
        assert_eq!(outcome.turns, 1);
        assert_eq!(dispatcher.call_count(), 0);
        let prompt = &model.prompts()[0];
        assert!(prompt.contains("UserGoal: What does this repo do?"));
        assert!(prompt.contains("Tool Versions: READ_FILE@v1"));
    }

    #[tokio::test]
    async fn evidence_prefix_after_reading_code() {
        let (_dir, sandbox) = sandbox();
        let model = Arc::new(SequentialMockModel::new(vec![
            tool_call("READ_FILE", json!({"path": "a.py"})),
            final_answer("foo does nothing."),
        ]));
        let dispatcher = Arc::new(RecordingDispatcher::new(read_ok));
        let outcome = controller(model, dispatcher, sandbox, AgentLimits::default())
            .run_detailed("what does foo do?")
            .await
            .unwrap();
        assert_eq!(outcome.answer, "Based on code evidence, foo does nothing.");
        assert_eq!(outcome.evidence_sources, vec!["READ_FILE:a.py"]);
    }

    #[tokio::test]
    async fn malformed_output_is_retried_then_parsed() {
        let (_dir, sandbox) = sandbox();
        let model = Arc::new(SequentialMockModel::new(vec![
            "I think the answer is".to_string(),
            format!("```json\n{}\n```", final_answer("fine")),
        ]));
        let outcome = controller(model.clone(), Arc::new(RecordingDispatcher::ok()), sandbox, AgentLimits::default())
            .run_detailed("why?")
            .await
            .unwrap();
        assert_eq!(outcome.answer, "fine");
        assert!(model.prompts()[1].contains("Your output does not match JSON format. Error: no JSON object found"));
    }

    #[tokio::test]
    async fn unparsable_output_after_retries_is_a_protocol_error() {
        let (_dir, sandbox) = sandbox();
        let model = Arc::new(SequentialMockModel::new(vec!["nope", "still nope", "never"]));
        let outcome = controller(model.clone(), Arc::new(RecordingDispatcher::ok()), sandbox, AgentLimits::default())
            .run_detailed("why?")
            .await
            .unwrap();
        assert_eq!(outcome.stop_reason, StopReason::ProtocolError);
        assert!(outcome.answer.starts_with("Model output protocol error: could not parse JSON after 3 attempts"));
        assert_eq!(model.call_count(), 3);
    }

    #[tokio::test]
    async fn unknown_type_and_missing_args_end_the_run() {
        let (_dir, sandbox) = sandbox();
        let model = Arc::new(SequentialMockModel::new(vec![r#"{"type":"chat","text":"hi"}"#]));
        let outcome = controller(model, Arc::new(RecordingDispatcher::ok()), sandbox.clone(), AgentLimits::default())
            .run_detailed("hi")
            .await
            .unwrap();
        assert!(outcome.answer.starts_with("Model output protocol error: type=chat raw="));

        let model = Arc::new(SequentialMockModel::new(vec![r#"{"type":"tool","tool":"GREP"}"#]));
        let outcome = controller(model, Arc::new(RecordingDispatcher::ok()), sandbox, AgentLimits::default())
            .run_detailed("hi")
            .await
            .unwrap();
        assert_eq!(outcome.answer, "Model output protocol error: type=tool but tool/args missing");
        assert_eq!(outcome.plan.phase, crate::plan::Phase::Failed);
    }

    #[tokio::test]
    async fn tool_budget_forces_final() {
        let (_dir, sandbox) = sandbox();
        let limits = AgentLimits {
            max_tool_calls: 2,
            ..AgentLimits::default()
        };
        let model = Arc::new(SequentialMockModel::new(vec![
            tool_call("GREP", json!({"pattern": "a"})),
            tool_call("GREP", json!({"pattern": "b"})),
            tool_call("GREP", json!({"pattern": "c"})),
            final_answer("partial answer"),
        ]));
        let dispatcher = Arc::new(RecordingDispatcher::ok());
        let outcome = controller(model.clone(), dispatcher.clone(), sandbox, limits)
            .run_detailed("find things")
            .await
            .unwrap();
        assert_eq!(dispatcher.call_count(), 2);
        assert_eq!(outcome.stop_reason, StopReason::ToolBudget);
        assert_eq!(outcome.tool_calls, 3);
        assert!(outcome.answer.ends_with("partial answer"));
        let forced = model.prompts().pop().unwrap();
        assert!(forced.contains("tool_budget_exceeded"));
        assert!(forced.contains("SYSTEM_INSTRUCTION: Provide a final answer now."));
    }

    #[tokio::test]
    async fn identical_reads_short_circuit_on_the_third_call() {
        let (_dir, sandbox) = sandbox();
        let args = json!({"path": "a.py", "startLine": 1, "endLine": 50});
        let model = Arc::new(SequentialMockModel::new(vec![
            tool_call("READ_FILE", args.clone()),
            tool_call("READ_FILE", args.clone()),
            tool_call("READ_FILE", args.clone()),
            final_answer("foo is a stub"),
        ]));
        let dispatcher = Arc::new(RecordingDispatcher::new(read_ok));
        let outcome = controller(model.clone(), dispatcher.clone(), sandbox, AgentLimits::default())
            .run_detailed("explain foo")
            .await
            .unwrap();
        assert_eq!(dispatcher.call_count(), 2);
        assert_eq!(outcome.stop_reason, StopReason::ReadLoop);
        assert_eq!(outcome.turns, 3);
        assert_eq!(model.call_count(), 4);
        // the second call was served from cache
        assert!(model.prompts()[2].contains("(cached) Tool Output (READ_FILE a.py lines 1-2)"));
    }

    #[tokio::test]
    async fn changed_content_is_not_a_loop() {
        let (_dir, sandbox) = sandbox();
        let args = json!({"path": "a.py"});
        let counter = std::sync::atomic::AtomicUsize::new(0);
        let dispatcher = Arc::new(RecordingDispatcher::new(move |tool, args| {
            let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            ok_observation(tool, args, json!({"filePath": "a.py", "content": format!("1→v{n}")}))
        }));
        let model = Arc::new(SequentialMockModel::new(vec![
            tool_call("READ_FILE", args.clone()),
            tool_call("READ_FILE", args.clone()),
            final_answer("done"),
        ]));
        let outcome = controller(model.clone(), dispatcher.clone(), sandbox, AgentLimits::default())
            .run_detailed("explain a.py")
            .await
            .unwrap();
        assert_eq!(dispatcher.call_count(), 2);
        assert_eq!(outcome.stop_reason, StopReason::Final);
        let third = &model.prompts()[2];
        assert!(third.contains("1→v1"));
        assert!(!third.contains("(cached)"));
    }

    #[tokio::test]
    async fn repeated_non_read_call_is_served_from_cache() {
        let (_dir, sandbox) = sandbox();
        let args = json!({"pattern": "foo"});
        let model = Arc::new(SequentialMockModel::new(vec![
            tool_call("GREP", args.clone()),
            tool_call("GREP", args.clone()),
            final_answer("done"),
        ]));
        let dispatcher = Arc::new(RecordingDispatcher::ok());
        let outcome = controller(model.clone(), dispatcher.clone(), sandbox, AgentLimits::default())
            .run_detailed("find foo")
            .await
            .unwrap();
        assert_eq!(dispatcher.call_count(), 1);
        assert!(outcome.plan.stall >= 1);
        assert!(model.prompts()[2].contains("Repeated call with same tool+args, cached result returned."));
    }

    #[tokio::test]
    async fn failing_tool_backs_off_then_escalates() {
        let (_dir, sandbox) = sandbox();
        let model = Arc::new(SequentialMockModel::new(vec![
            tool_call("READ_FILE", json!({"path": "x1"})),
            tool_call("READ_FILE", json!({"path": "x2"})),
            tool_call("READ_FILE", json!({"path": "x3"})),
            tool_call("GREP", json!({"pattern": "q"})),
            final_answer("could not find it"),
        ]));
        let dispatcher = Arc::new(RecordingDispatcher::new(|tool, _| error_observation(tool, "file_not_found")));
        let outcome = controller(model.clone(), dispatcher.clone(), sandbox, AgentLimits::default())
            .run_detailed("read the x files")
            .await
            .unwrap();
        // third READ_FILE was skipped by backoff, GREP ran and failed
        assert_eq!(
            dispatcher.calls().iter().map(|(t, _)| t.as_str()).collect::<Vec<_>>(),
            vec!["READ_FILE", "READ_FILE", "GREP"]
        );
        assert!(model.prompts()[3].contains("tool_backoff"));
        assert_eq!(outcome.stop_reason, StopReason::Final);
        assert!(model.prompts()[4].contains("too_many_tool_errors"));
    }

    #[tokio::test]
    async fn consecutive_errors_with_evidence_force_final() {
        let (dir, sandbox) = sandbox();
        std::fs::write(dir.path().join("CLAUDE.md"), "Project notes").unwrap();
        std::fs::write(dir.path().join("AGENTS.md"), "Be terse").unwrap();
        let model = Arc::new(SequentialMockModel::new(vec![
            tool_call("READ_FILE", json!({"path": "x1"})),
            tool_call("GREP", json!({"pattern": "x"})),
            tool_call("LIST_FILES", json!({"path": "x"})),
            final_answer("best effort"),
        ]));
        let dispatcher = Arc::new(RecordingDispatcher::new(|tool, _| error_observation(tool, "boom")));
        let outcome = controller(model, dispatcher, sandbox, AgentLimits::default())
            .run_detailed("fix x")
            .await
            .unwrap();
        assert_eq!(outcome.stop_reason, StopReason::ConsecutiveErrors);
        assert_eq!(outcome.answer, "Based on project memory, best effort");
    }

    #[tokio::test]
    async fn turn_budget_forces_final_on_the_last_turn() {
        let (_dir, sandbox) = sandbox();
        let limits = AgentLimits {
            max_turns: 2,
            ..AgentLimits::default()
        };
        let model = Arc::new(SequentialMockModel::new(vec![
            tool_call("GREP", json!({"pattern": "a"})),
            tool_call("GREP", json!({"pattern": "b"})),
            "not json at all".to_string(),
        ]));
        let outcome = controller(model, Arc::new(RecordingDispatcher::ok()), sandbox, limits)
            .run_detailed("look")
            .await
            .unwrap();
        assert_eq!(outcome.stop_reason, StopReason::TurnBudget);
        assert_eq!(outcome.turns, 2);
        // no evidence was gathered, so no prefix
        assert_eq!(outcome.answer, "not json at all");
    }

    #[tokio::test]
    async fn repeated_search_query_with_evidence_forces_final() {
        let (_dir, sandbox) = sandbox();
        let hits = json!({"hits": [{"filePath": "src/auth.rs", "startLine": 1, "endLine": 5, "symbolName": "login", "symbolKind": "fn", "score": 1.0, "snippet": ""}]});
        let dispatcher = Arc::new(RecordingDispatcher::new(move |tool, args| ok_observation(tool, args, hits.clone())));
        let model = Arc::new(SequentialMockModel::new(vec![
            tool_call("SEARCH_KNOWLEDGE", json!({"query": "login"})),
            tool_call("SEARCH_KNOWLEDGE", json!({"query": "login", "topK": 8})),
            tool_call("SEARCH_KNOWLEDGE", json!({"query": " login", "topK": 3})),
            final_answer("login lives in src/auth.rs"),
        ]));
        let outcome = controller(model.clone(), dispatcher.clone(), sandbox, AgentLimits::default())
            .run_detailed("where is login handled?")
            .await
            .unwrap();
        // the second identical query still runs; the third trips the check
        assert_eq!(dispatcher.call_count(), 3);
        assert!(!model.prompts()[2].contains("repeated_query"));
        assert_eq!(outcome.stop_reason, StopReason::RepeatedQuery);
        assert_eq!(outcome.answer, "Based on retrieved results, login lives in src/auth.rs");
        assert!(outcome.facts.iter().any(|f| f.key == "Hit1" && f.value == "src/auth.rs fn:login"));
    }

    #[tokio::test]
    async fn low_search_efficiency_injects_a_hint() {
        let (_dir, sandbox) = sandbox();
        let dispatcher = Arc::new(RecordingDispatcher::new(|tool, args| ok_observation(tool, args, json!({"hits": []}))));
        let model = Arc::new(SequentialMockModel::new(vec![
            tool_call("SEARCH_KNOWLEDGE", json!({"query": "a"})),
            tool_call("SEARCH_KNOWLEDGE", json!({"query": "b"})),
            tool_call("SEARCH_KNOWLEDGE", json!({"query": "c"})),
            final_answer("nothing found"),
        ]));
        let outcome = controller(model.clone(), dispatcher, sandbox, AgentLimits::default())
            .run_detailed("search around")
            .await
            .unwrap();
        assert_eq!(outcome.stop_reason, StopReason::Final);
        assert!(!model.prompts()[2].contains("low_search_efficiency"));
        assert!(model.prompts()[3].contains("low_search_efficiency"));
    }

    #[tokio::test]
    async fn model_failure_in_forced_final_becomes_the_answer() {
        struct Flaky(SequentialMockModel);

        #[async_trait::async_trait]
        impl ModelClient for Flaky {
            fn name(&self) -> &str {
                "flaky"
            }
            async fn chat(&self, prompt: &str) -> Result<String, ModelError> {
                if prompt.contains("SYSTEM_INSTRUCTION") {
                    return Err(ModelError::Timeout("slow".into()));
                }
                self.0.chat(prompt).await
            }
        }

        let (_dir, sandbox) = sandbox();
        let limits = AgentLimits {
            max_turns: 1,
            ..AgentLimits::default()
        };
        let model = Arc::new(Flaky(SequentialMockModel::new(vec![tool_call("GREP", json!({"pattern": "a"}))])));
        let outcome = ReActLoopController::new(model, Arc::new(RecordingDispatcher::ok()), sandbox, limits)
            .run_detailed("look")
            .await
            .unwrap();
        assert!(outcome.answer.starts_with("Failed to generate final answer:"));
    }

    #[tokio::test]
    async fn run_finished_event_is_published() {
        let (_dir, sandbox) = sandbox();
        let bus = Arc::new(EventBus::new(16));
        let mut rx = bus.subscribe();
        let model = Arc::new(SequentialMockModel::new(vec![final_answer("ok")]));
        controller(model, Arc::new(RecordingDispatcher::ok()), sandbox, AgentLimits::default())
            .with_event_bus(bus.clone())
            .run("why?")
            .await
            .unwrap();
        match rx.recv().await.unwrap().as_ref() {
            DomainEvent::RunFinished { turns, stop_reason, .. } => {
                assert_eq!(*turns, 1);
                assert_eq!(stop_reason, "final");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn chat_history_and_ide_context_reach_the_prompt() {
        let (dir, sandbox) = sandbox();
        std::fs::write(
            dir.path().join("ide.txt"),
            "ClassStructure:\n- Parser\n  * parse()\n- Printer\n  * print()\n",
        )
        .unwrap();
        let model = Arc::new(SequentialMockModel::new(vec![final_answer("ok")]));
        controller(model.clone(), Arc::new(RecordingDispatcher::ok()), sandbox, AgentLimits::default())
            .with_chat_history(vec!["User: earlier question".into()])
            .with_ide_context("ide.txt")
            .run("how does the parser work?")
            .await
            .unwrap();
        let prompt = &model.prompts()[0];
        assert!(prompt.contains("ChatHistory (User/Assistant):\nUser: earlier question"));
        assert!(prompt.contains("IDEContext:\nClassStructure:\n- Parser\n  * parse()\n- Printer\n"));
        assert!(!prompt.contains("print()"));
        assert!(prompt.contains("ProjectStructurePath: ide.txt"));
    }

    /// goal "rename foo to bar in a.py": read, edit (staged), final.
    #[tokio::test]
    async fn rename_scenario_stages_one_edit() {
        let dir = tempfile::tempdir().unwrap();
        let original = "def foo():\n    return 1\n";
        std::fs::write(dir.path().join("a.py"), original).unwrap();

        let store = Arc::new(PendingChangeStore::new());
        let factory = SandboxFactory::new(Arc::clone(&store), SandboxConfig::default());
        let registry = default_registry(&factory, &ToolsConfig::default(), None);
        let executor = ToolExecutor::new(registry, ToolPolicy::permissive(), 12_000);
        let sandbox = factory.for_root(dir.path(), Some("run-1"));

        let model = Arc::new(SequentialMockModel::new(vec![
            tool_call("READ_FILE", json!({"path": "a.py"})),
            tool_call("EDIT_FILE", json!({"path": "a.py", "old_str": "def foo", "new_str": "def bar"})),
            final_answer("Renamed foo to bar in a.py; the change is staged for review."),
        ]));
        let outcome = controller(model.clone(), Arc::new(executor), sandbox, AgentLimits::default())
            .run_detailed("rename function foo to bar in a.py")
            .await
            .unwrap();

        assert_eq!(outcome.stop_reason, StopReason::Final);
        assert_eq!(outcome.tool_calls, 2);
        assert_eq!(outcome.pending_changes.len(), 1);
        let change = &outcome.pending_changes[0];
        assert_eq!(change.path, "a.py");
        assert_eq!(change.change_type, ChangeType::Edit);
        assert_eq!(change.old_content.as_deref(), Some(original));
        assert_eq!(change.new_content.as_deref(), Some("def bar():\n    return 1\n"));
        // staged only
        assert_eq!(std::fs::read_to_string(dir.path().join("a.py")).unwrap(), original);

        let third_prompt = &model.prompts()[2];
        assert!(third_prompt.contains("[Pending Changes]\n- a.py (EDIT)"));
        assert!(third_prompt.contains("Tool Output (EDIT_FILE a.py): Preview staged (pending apply)"));
        assert!(third_prompt.contains("[Read Files]\n- a.py"));
    }

    #[tokio::test]
    async fn edit_preview_then_real_edit_is_staged() {
        let dir = tempfile::tempdir().unwrap();
        let original = "def foo():\n    return 1\n";
        std::fs::write(dir.path().join("a.py"), original).unwrap();

        let store = Arc::new(PendingChangeStore::new());
        let factory = SandboxFactory::new(Arc::clone(&store), SandboxConfig::default());
        let registry = default_registry(&factory, &ToolsConfig::default(), None);
        let executor = ToolExecutor::new(registry, ToolPolicy::permissive(), 12_000);
        let sandbox = factory.for_root(dir.path(), Some("run-1"));

        let edit = json!({"path": "a.py", "old_str": "def foo", "new_str": "def bar"});
        let mut preview = edit.clone();
        preview["dry_run"] = json!(true);
        let model = Arc::new(SequentialMockModel::new(vec![
            tool_call("EDIT_FILE", preview),
            tool_call("EDIT_FILE", edit),
            final_answer("Renamed foo to bar."),
        ]));
        let outcome = controller(model.clone(), Arc::new(executor), sandbox, AgentLimits::default())
            .run_detailed("rename function foo to bar in a.py")
            .await
            .unwrap();

        assert_eq!(outcome.stop_reason, StopReason::Final);
        assert_eq!(outcome.tool_calls, 2);
        assert_eq!(outcome.pending_changes.len(), 1);
        assert_eq!(
            outcome.pending_changes[0].new_content.as_deref(),
            Some("def bar():\n    return 1\n")
        );
        assert!(!model.prompts()[2].contains("(cached)"));
    }
}
