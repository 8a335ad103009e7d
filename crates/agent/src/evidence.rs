//! Evidence tracking and the attribution prefix on final answers.

use codeagent_core::observation::{Field, is_error_value};
use serde_json::Value;

const MAX_SOURCES: usize = 20;
const MAX_HIT_FACTS: usize = 5;

/// Strongest class of evidence behind an answer, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EvidenceKind {
    Context,
    Memory,
    Search,
    Code,
}

impl EvidenceKind {
    pub fn prefix(self) -> &'static str {
        match self {
            EvidenceKind::Code => "Based on code evidence, ",
            EvidenceKind::Search => "Based on retrieved results, ",
            EvidenceKind::Memory => "Based on project memory, ",
            EvidenceKind::Context => "Based on available context, ",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EvidenceTracker {
    sources: Vec<String>,
    strongest: Option<EvidenceKind>,
}

/// Han, kana and Hangul ranges. An answer in one of these scripts gets no
/// English prefix.
const CJK_RANGES: &[(char, char)] = &[
    ('\u{1100}', '\u{11FF}'), // Hangul Jamo
    ('\u{3040}', '\u{30FF}'), // Hiragana, Katakana
    ('\u{3130}', '\u{318F}'), // Hangul compatibility Jamo
    ('\u{3400}', '\u{4DBF}'), // CJK extension A
    ('\u{4E00}', '\u{9FFF}'), // CJK unified ideographs
    ('\u{AC00}', '\u{D7AF}'), // Hangul syllables
    ('\u{F900}', '\u{FAFF}'), // CJK compatibility ideographs
];

fn is_cjk(answer: &str) -> bool {
    answer
        .chars()
        .any(|c| CJK_RANGES.iter().any(|&(lo, hi)| (lo..=hi).contains(&c)))
}

impl EvidenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn has_evidence(&self) -> bool {
        self.strongest.is_some()
    }

    pub fn has_code_evidence(&self) -> bool {
        self.strongest == Some(EvidenceKind::Code)
    }

    /// Enough to answer without more tools: code evidence, or any evidence
    /// backed by a non-empty fact ledger.
    pub fn is_sufficient(&self, has_facts: bool) -> bool {
        self.has_code_evidence() || (self.has_evidence() && has_facts)
    }

    pub fn add(&mut self, source: impl Into<String>, kind: EvidenceKind) {
        let source = source.into();
        if !self.sources.contains(&source) && self.sources.len() < MAX_SOURCES {
            self.sources.push(source);
        }
        self.strongest = self.strongest.max(Some(kind));
    }

    /// Record what a successful observation contributes. Returns hit facts
    /// (`Hit1`..`Hit5`) for knowledge-search results.
    pub fn record_observation(&mut self, tool: &str, args: &Value, obs: &Value) -> Vec<(String, String)> {
        if is_error_value(obs) {
            return Vec::new();
        }
        let result = Field::of(obs, "result").value().unwrap_or(&Value::Null);
        let arg = |keys: &[&str]| Field::first_of(args, keys).text().trim().to_string();
        match tool {
            "READ_FILE" | "OPEN_FILE_VIEW" => {
                if Field::of(result, "content").non_empty_str().is_some() {
                    let path = Field::first_of(result, &["filePath"]).text();
                    let path = if path.is_empty() { arg(&["path", "file_path"]) } else { path };
                    self.add(format!("READ_FILE:{path}"), EvidenceKind::Code);
                }
            }
            "GREP" | "SEARCH_FILE" => {
                let has_matches = ["matches", "hits"].iter().any(|key| {
                    Field::of(result, key)
                        .value()
                        .and_then(Value::as_array)
                        .is_some_and(|a| !a.is_empty())
                });
                if has_matches {
                    self.add(format!("GREP:{}", arg(&["root", "path"])), EvidenceKind::Code);
                }
            }
            "LIST_FILES" | "REPO_MAP" | "STRUCTURE_MAP" => {
                self.add(format!("{tool}:{}", arg(&["path"])), EvidenceKind::Context);
            }
            "SEARCH_KNOWLEDGE" => {
                let hits = Field::of(result, "hits").value().and_then(Value::as_array);
                if let Some(hits) = hits.filter(|h| !h.is_empty()) {
                    self.add(format!("SEARCH_KNOWLEDGE:{}", arg(&["query"])), EvidenceKind::Search);
                    return hits.iter().take(MAX_HIT_FACTS).enumerate().map(|(i, hit)| hit_fact(i, hit)).collect();
                }
            }
            _ => {}
        }
        Vec::new()
    }

    /// `prefix + answer`, or the answer alone when there is no evidence or
    /// the answer is written in a CJK script.
    pub fn qualify(&self, answer: &str) -> String {
        match self.strongest {
            Some(kind) if !is_cjk(answer) => format!("{}{answer}", kind.prefix()),
            _ => answer.to_string(),
        }
    }
}

fn hit_fact(index: usize, hit: &Value) -> (String, String) {
    let path = Field::first_of(hit, &["filePath", "file_path"]).text();
    let kind = Field::first_of(hit, &["symbolKind", "kind"]).text();
    let name = Field::first_of(hit, &["symbolName", "name"]).text();
    let value = if name.is_empty() {
        format!("{path}:{}", Field::of(hit, "startLine").text())
    } else {
        format!("{path} {kind}:{name}")
    };
    (format!("Hit{}", index + 1), value)
}

/// Signature of a knowledge hit for the efficiency check.
pub fn hit_signature(hit: &Value) -> String {
    format!(
        "{}:{}:{}",
        Field::first_of(hit, &["filePath", "file_path"]).text(),
        Field::first_of(hit, &["startLine", "start_line"]).text(),
        Field::first_of(hit, &["symbolName", "symbol_name"]).text()
    )
}

/// Final answer text: a placeholder when empty, then qualified.
pub fn finalize_answer(answer: &str, evidence: &EvidenceTracker) -> String {
    let answer = answer.trim();
    if answer.is_empty() {
        return "Final answer not generated.".to_string();
    }
    evidence.qualify(answer)
}
