//! Advisory plan state rendered into every prompt.
//!
//! The plan is seeded from the goal and advanced by the categories of the
//! tools the model calls. It never blocks a tool call; it only tells the
//! model where it appears to be and whether it is stalling.

use codeagent_core::text::truncate;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Init,
    Planned,
    Executing,
    Verifying,
    Done,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Init => "INIT",
            Phase::Planned => "PLANNED",
            Phase::Executing => "EXECUTING",
            Phase::Verifying => "VERIFYING",
            Phase::Done => "DONE",
            Phase::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Active,
    Done,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StepStatus::Pending => "PENDING",
            StepStatus::Active => "ACTIVE",
            StepStatus::Done => "DONE",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanStep {
    pub name: String,
    pub status: StepStatus,
    /// Actions recorded while this step was active.
    pub progress: u32,
}

/// What a tool call contributes to the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCategory {
    Search,
    Modify,
    Verify,
    Other,
}

impl ToolCategory {
    pub fn of(tool: &str) -> Self {
        match tool {
            "SEARCH_KNOWLEDGE" | "LIST_FILES" | "GREP" | "READ_FILE" | "OPEN_FILE_VIEW" | "SEARCH_FILE"
            | "REPO_MAP" | "STRUCTURE_MAP" => ToolCategory::Search,
            "EDIT_FILE" | "WRITE_FILE" | "CREATE_FILE" | "INSERT_LINE" | "REPLACE_LINES" | "DELETE_FILE"
            | "APPLY_PATCH" | "BATCH_REPLACE" | "UNDO_EDIT" | "MOVE_PATH" | "CREATE_DIRECTORY" => {
                ToolCategory::Modify
            }
            "RUN_COMMAND" => ToolCategory::Verify,
            _ => ToolCategory::Other,
        }
    }
}

/// Whether a tool mutates the workspace (or its staged view).
pub fn is_modification_tool(tool: &str) -> bool {
    ToolCategory::of(tool) == ToolCategory::Modify
}

fn looks_like_question(goal: &str) -> bool {
    let lower = goal.trim().to_lowercase();
    lower.ends_with('?')
        || lower.contains('？')
        || ["what", "how", "why", "where", "which", "explain", "describe"]
            .iter()
            .any(|w| lower.starts_with(w) || lower.contains(&format!(" {w} ")))
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanState {
    pub phase: Phase,
    pub steps: Vec<PlanStep>,
    pub current: usize,
    pub stall: u32,
    pub last_signature: Option<String>,
    pub last_observation: Option<String>,
}

impl PlanState {
    pub fn new() -> Self {
        Self {
            phase: Phase::Init,
            steps: Vec::new(),
            current: 0,
            stall: 0,
            last_signature: None,
            last_observation: None,
        }
    }

    /// Seed two steps for a question, three for an action.
    pub fn from_goal(goal: &str) -> Self {
        let names: &[&str] = if looks_like_question(goal) {
            &["Locate relevant code", "Answer"]
        } else {
            &["Locate relevant code", "Make changes", "Verify"]
        };
        let steps = names
            .iter()
            .enumerate()
            .map(|(i, name)| PlanStep {
                name: name.to_string(),
                status: if i == 0 { StepStatus::Active } else { StepStatus::Pending },
                progress: 0,
            })
            .collect();
        Self {
            phase: Phase::Planned,
            steps,
            ..Self::new()
        }
    }

    pub fn record_action(&mut self, tool: &str, signature: &str, is_loop: bool) {
        let repeated = self.last_signature.as_deref() == Some(signature);
        if repeated || is_loop {
            self.stall += 1;
        } else {
            self.stall = self.stall.saturating_sub(1);
        }
        self.last_signature = Some(signature.to_string());

        match ToolCategory::of(tool) {
            ToolCategory::Search => {
                self.activate_step(0);
                self.phase = Phase::Executing;
            }
            ToolCategory::Modify => {
                self.activate_step(1);
                self.phase = Phase::Executing;
            }
            ToolCategory::Verify => {
                self.activate_step(2);
                self.phase = Phase::Verifying;
            }
            ToolCategory::Other => {}
        }
    }

    pub fn record_observation(&mut self, summary: &str) {
        self.last_observation = Some(truncate(summary.trim(), 200).to_string());
    }

    pub fn mark_done(&mut self) {
        for step in &mut self.steps {
            step.status = StepStatus::Done;
        }
        self.phase = Phase::Done;
    }

    pub fn mark_failed(&mut self) {
        self.phase = Phase::Failed;
    }

    fn activate_step(&mut self, index: usize) {
        if self.steps.is_empty() {
            return;
        }
        let index = index.min(self.steps.len() - 1);
        for (i, step) in self.steps.iter_mut().enumerate() {
            if i < index {
                step.status = StepStatus::Done;
            } else if i == index {
                step.status = StepStatus::Active;
                step.progress += 1;
            }
        }
        self.current = index;
    }

    pub fn render(&self) -> String {
        let mut out = format!("Phase: {}\n", self.phase);
        for step in &self.steps {
            out.push_str(&format!("* {} [{}] p={}\n", step.name, step.status, step.progress));
        }
        if self.stall >= 2 {
            out.push_str(&format!("Stall: {} (change tool or adjust plan)\n", self.stall));
        }
        if let Some(obs) = &self.last_observation {
            out.push_str(&format!("LastObs: {obs}\n"));
        }
        out
    }
}

impl Default for PlanState {
    fn default() -> Self {
        Self::new()
    }
}
