//! Prompt assembly under a character budget.
//!
//! Layout, in order:
//!
//! | Section | Content |
//! |---------|---------|
//! | Static system | role, tool protocol, tool list and versions |
//! | Static context | IDE snapshot, project memory, long-term memory, AGENTS.md |
//! | Dynamic context | goal, facts, pending changes, read files, plan, chat history |
//! | History | the last turns, observations rendered compact |
//! | Pinned | the most recent observation, rendered in full |
//!
//! When over budget the fixed part is cut as a block first, then history
//! entries are dropped from the oldest end until the rest fits next to the
//! pinned observation.

use codeagent_core::text::{char_len, truncate, truncate_with};
use codeagent_core::tool::ToolSpec;
use codeagent_tools::PendingChange;
use serde_json::Value;

use crate::context::files::{ContextFiles, MAX_LONG_TERM_MEMORY_CHARS, MAX_PROJECT_MEMORY_CHARS};
use crate::context::render::{Detail, render_observation};
use crate::facts::FactLedger;
use crate::plan::PlanState;

const MAX_GOAL_CHARS: usize = 4000;
const MAX_FACTS_BLOCK_CHARS: usize = 6000;
const MAX_PENDING_LINES: usize = 8;
const MAX_CHAT_LINES: usize = 8;
const MAX_CHAT_LINE_CHARS: usize = 600;
const MAX_PINNED_CHARS: usize = 4000;
const MAX_HISTORY_OBS_CHARS: usize = 2000;
const MAX_TOOL_CALL_ARGS_CHARS: usize = 500;

const ROLE: &str = "You are an interactive CLI tool that helps users with software engineering tasks. \
Use the instructions below and the tools available to you to assist the user.\n\n\
IMPORTANT: Always answer in the language of the user's input unless the user asks otherwise. \
Code and technical terms stay as they are.\n\n";

const PROTOCOL: &str = "Protocol: \
1. Evidence: use the most direct tool. If IDEContext already shows the relevant files, skip REPO_MAP/STRUCTURE_MAP and READ_FILE directly. \
2. Search: if SEARCH_KNOWLEDGE returns no hits, fall back to LIST_FILES then GREP. Stop searching once results stop adding new information. \
3. No redundancy: do not read the same file range twice (paging forward is fine). \
4. Constraints: follow ProjectMemory, LongTermMemory and IDEContext when relevant. \
5. Facts: record only facts backed by tool output or the user's words. Staged edits are pending; never claim a change is applied unless APPLY_PENDING_DIFF succeeded. \
6. Edits: edits are staged for review. Do not ask the user to confirm in chat; call APPLY_PENDING_DIFF only when the user explicitly asked for changes to be applied. \
7. Output: strict JSON only, nothing outside the object. finalAnswer may contain markdown. \
8. finalAnswer is for the user and leaves out tool and system details. \
9. Thought: one short, non-sensitive sentence in the user's language. \
10. Code: show only the core logic or changed lines unless the full file is requested. ";

const FORMAT: &str = "\nFormat: {\"thought\":\"one short sentence\",\"type\":\"tool\"|\"final\",\"tool\":\"NAME\",\"version\":\"v1\",\"args\":{...},\"facts\":{\"Title\":\"Detail\"},\"finalAnswer\":\"...\"}";

const FORCE_FINAL: &str = "\n\nSYSTEM_INSTRUCTION: Provide a final answer now. \
Do not mention tools, tool limits, system errors or the internal protocol. \
Using the facts and history above, write the final answer to the user goal. \
If facts are missing, say what is unknown instead of guessing. \
Output strictly in JSON format: {\"type\":\"final\", \"finalAnswer\":\"...\"}";

/// One line of the run's own history.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryEntry {
    Thought(String),
    ToolCall { signature: String, args: Value },
    /// Raw observation envelope.
    Observation(String),
    Note(String),
}

impl HistoryEntry {
    pub fn is_observation(&self) -> bool {
        matches!(self, HistoryEntry::Observation(_))
    }

    fn render(&self) -> String {
        match self {
            HistoryEntry::Thought(t) => format!("THOUGHT: {t}"),
            HistoryEntry::ToolCall { signature, args } => {
                let head = signature.split('|').next().unwrap_or(signature);
                format!(
                    "TOOL_CALL: {head} {}",
                    truncate_with(&args.to_string(), MAX_TOOL_CALL_ARGS_CHARS, "...")
                )
            }
            HistoryEntry::Observation(raw) => {
                let text = render_observation(raw, Detail::Compact);
                let text = truncate_with(
                    &text,
                    MAX_HISTORY_OBS_CHARS,
                    "\n... (Content truncated, see [Verified Facts] or read the file again)",
                );
                format!("OBS {text}")
            }
            HistoryEntry::Note(n) => n.clone(),
        }
    }
}

/// Character budgets for one prompt.
#[derive(Debug, Clone, Copy)]
pub struct PromptBudget {
    pub max_prompt_chars: usize,
    pub history_tail: usize,
    pub max_chat_history_chars: usize,
}

pub struct PromptInput<'a> {
    pub goal: &'a str,
    pub tool_specs: &'a [ToolSpec],
    pub run_command_enabled: bool,
    pub files: &'a ContextFiles,
    pub facts: &'a FactLedger,
    pub pending: &'a [PendingChange],
    pub read_files: &'a [String],
    pub plan: &'a PlanState,
    pub chat_history: &'a [String],
    pub history: &'a [HistoryEntry],
    /// Index into `history` of the observation to pin.
    pub pinned: Option<usize>,
}

fn visible_specs(specs: &[ToolSpec], run_command_enabled: bool) -> Vec<&ToolSpec> {
    specs
        .iter()
        .filter(|s| run_command_enabled || s.name != "RUN_COMMAND")
        .collect()
}

fn static_system(input: &PromptInput<'_>) -> String {
    let mut out = String::from(ROLE);
    out.push_str(PROTOCOL);
    let specs = visible_specs(input.tool_specs, input.run_command_enabled);
    if !specs.is_empty() {
        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        let versions: Vec<String> = specs.iter().map(|s| format!("{}@{}", s.name, s.version)).collect();
        out.push_str(&format!("\nTools: {}", names.join(" | ")));
        out.push_str(&format!("\nTool Versions: {}", versions.join(" | ")));
    }
    if !input.run_command_enabled {
        out.push_str("\nNote: RUN_COMMAND is currently disabled for safety.");
    }
    out.push_str(FORMAT);
    out
}

fn static_context(files: &ContextFiles) -> String {
    let mut out = String::new();
    if !files.ide_context.is_empty() {
        out.push_str(&format!("\nIDEContext:\n{}\n", files.ide_context));
    }
    if !files.project_memory.is_empty() {
        out.push_str(&format!(
            "\nProjectMemory:\n{}\n",
            truncate(&files.project_memory, MAX_PROJECT_MEMORY_CHARS)
        ));
    }
    if !files.long_term_memory.is_empty() {
        out.push_str(&format!(
            "\nLongTermMemory:\n{}\n",
            truncate(&files.long_term_memory, MAX_LONG_TERM_MEMORY_CHARS)
        ));
    }
    if !files.agents_md.is_empty() {
        out.push_str(&format!(
            "\nAGENTS.md (Context):\n{}\n",
            truncate(&files.agents_md, MAX_LONG_TERM_MEMORY_CHARS)
        ));
    }
    out
}

fn dynamic_context(input: &PromptInput<'_>, budget: &PromptBudget) -> String {
    let mut out = format!("\nUserGoal: {}", truncate(input.goal, MAX_GOAL_CHARS));
    if let Some(path) = &input.files.ide_path {
        out.push_str(&format!("\nProjectStructurePath: {}", path.display()));
        if input.files.ide_context.is_empty() {
            out.push_str("\nThe IDE structure snapshot could not be read. READ_FILE the path above if you need it.");
        } else {
            out.push_str("\nThe IDE structure snapshot is included in IDEContext above.");
        }
    }

    let facts = input.facts.render(MAX_FACTS_BLOCK_CHARS);
    if !facts.is_empty() {
        out.push_str(&format!("\n[Verified Facts]\n{facts}"));
    }

    if !input.pending.is_empty() {
        out.push_str("\n[Pending Changes]\n");
        for change in input.pending.iter().take(MAX_PENDING_LINES) {
            out.push_str(&format!("- {} ({})\n", change.path, change.change_type.as_str()));
        }
        if input.pending.len() > MAX_PENDING_LINES {
            out.push_str(&format!("- ... ({} more)\n", input.pending.len() - MAX_PENDING_LINES));
        }
    }

    if !input.read_files.is_empty() {
        out.push_str("\n[Read Files]\n");
        for file in input.read_files {
            out.push_str(&format!("- {file}\n"));
        }
    }

    let plan = input.plan.render();
    if !plan.is_empty() {
        out.push_str(&format!("\nPlan:\n{plan}"));
    }

    if !input.chat_history.is_empty() {
        let mut block = String::new();
        let start = input.chat_history.len().saturating_sub(MAX_CHAT_LINES);
        for line in &input.chat_history[start..] {
            let line = format!("{}\n", truncate(line, MAX_CHAT_LINE_CHARS));
            if char_len(&block) + char_len(&line) > budget.max_chat_history_chars {
                break;
            }
            block.push_str(&line);
        }
        out.push_str(&format!("\nChatHistory (User/Assistant):\n{block}"));
    }
    out
}

/// Assemble the turn prompt.
pub fn build_prompt(input: &PromptInput<'_>, budget: &PromptBudget) -> String {
    let max = budget.max_prompt_chars;
    let pinned = input
        .pinned
        .and_then(|i| input.history.get(i))
        .and_then(|entry| match entry {
            HistoryEntry::Observation(raw) => Some(format!(
                "\nPinnedObservation:\n{}\n",
                truncate(&render_observation(raw, Detail::Full), MAX_PINNED_CHARS)
            )),
            _ => None,
        })
        .unwrap_or_default();
    let pinned_len = char_len(&pinned);

    let mut base = static_system(input);
    base.push_str(&static_context(input.files));
    base.push_str(&dynamic_context(input, budget));
    base.push_str("\nHistory:\n");
    if char_len(&base) > max {
        base = truncate(&base, max.saturating_sub(pinned_len)).to_string();
    }
    let room = max.saturating_sub(char_len(&base) + pinned_len);

    let start = input.history.len().saturating_sub(budget.history_tail);
    let mut lines: Vec<String> = input.history[start..]
        .iter()
        .enumerate()
        .filter(|(offset, _)| Some(start + offset) != input.pinned)
        .map(|(_, entry)| format!("- {}\n", entry.render()))
        .collect();
    let mut used: usize = lines.iter().map(|l| char_len(l)).sum();
    while used > room && !lines.is_empty() {
        used -= char_len(&lines.remove(0));
    }

    let mut out = base;
    for line in &lines {
        out.push_str(line);
    }
    if !pinned.is_empty() && char_len(&out) + pinned_len <= max {
        out.push_str(&pinned);
    }
    out
}

/// The same prompt with an "answer now" instruction appended.
pub fn build_force_final_prompt(input: &PromptInput<'_>, budget: &PromptBudget) -> String {
    let mut prompt = build_prompt(input, budget);
    prompt.push_str(FORCE_FINAL);
    prompt
}
