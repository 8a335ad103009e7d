//! Fact ledger: the loop's working memory of verified key/value facts.
//!
//! Facts come from the model's `facts` object, from loaded context files and
//! from search hits. The ledger is bounded; when full, the lowest-priority
//! fact goes first, oldest first among equals. Values are deduplicated by a
//! whitespace- and case-insensitive fingerprint so the same finding filed
//! under two keys is kept once.

use codeagent_core::text::{collapse_whitespace, truncate};
use serde::Serialize;
use std::collections::HashMap;

const MAX_VALUE_CHARS: usize = 600;
const MIN_FINGERPRINT_CHARS: usize = 6;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fact {
    pub key: String,
    pub value: String,
    pub priority: u32,
    /// Insertion order, refreshed when a key is overwritten.
    pub seq: u64,
}

#[derive(Debug, Clone)]
pub struct FactLedger {
    capacity: usize,
    entries: HashMap<String, Fact>,
    /// fingerprint -> owning key
    fingerprints: HashMap<String, String>,
    next_seq: u64,
}

fn fingerprint(value: &str) -> Option<String> {
    let fp = collapse_whitespace(value).to_lowercase();
    (fp.chars().count() >= MIN_FINGERPRINT_CHARS).then_some(fp)
}

/// Heuristic weight: plan keys first, then anything naming a file, then
/// error reports.
pub fn estimate_priority(key: &str, value: &str) -> u32 {
    let mut priority = 1;
    let key_lower = key.to_lowercase();
    if key_lower.starts_with("plan") || key_lower.starts_with("step") {
        priority += 5;
    }
    let text = format!("{key} {value}").to_lowercase();
    let names_file = [".java", ".kt", ".xml", ".rs", ".py", ".ts", ".go"]
        .iter()
        .any(|ext| text.contains(ext))
        || text.contains('/');
    if names_file {
        priority += 2;
    }
    if text.contains("error") || text.contains("exception") {
        priority += 1;
    }
    priority
}

impl FactLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            fingerprints: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|f| f.value.as_str())
    }

    /// Insert or overwrite a fact. Returns false when the key or value is
    /// blank, or the same value is already held under a different key.
    pub fn put(&mut self, key: &str, value: &str) -> bool {
        let key = key.trim();
        let value = truncate(value.trim(), MAX_VALUE_CHARS);
        if key.is_empty() || value.is_empty() {
            return false;
        }
        let fp = fingerprint(value);
        if let Some(fp) = &fp {
            if let Some(owner) = self.fingerprints.get(fp) {
                if owner != key {
                    return false;
                }
            }
        }

        if let Some(old) = self.entries.remove(key) {
            if let Some(old_fp) = fingerprint(&old.value) {
                self.fingerprints.remove(&old_fp);
            }
        }
        while self.entries.len() >= self.capacity {
            self.evict_one();
        }

        self.next_seq += 1;
        let fact = Fact {
            key: key.to_string(),
            value: value.to_string(),
            priority: estimate_priority(key, value),
            seq: self.next_seq,
        };
        if let Some(fp) = fp {
            self.fingerprints.insert(fp, key.to_string());
        }
        self.entries.insert(key.to_string(), fact);
        true
    }

    /// Merge every string-ish member of a model-supplied `facts` object.
    /// Returns how many were accepted.
    pub fn merge_json(&mut self, facts: &serde_json::Value) -> usize {
        let Some(map) = facts.as_object() else {
            return 0;
        };
        let mut accepted = 0;
        for (key, value) in map {
            let text = match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => continue,
                other => other.to_string(),
            };
            if self.put(key, &text) {
                accepted += 1;
            }
        }
        accepted
    }

    fn evict_one(&mut self) {
        let victim = self
            .entries
            .values()
            .min_by_key(|f| (f.priority, f.seq))
            .map(|f| f.key.clone());
        if let Some(key) = victim {
            if let Some(fact) = self.entries.remove(&key) {
                if let Some(fp) = fingerprint(&fact.value) {
                    self.fingerprints.remove(&fp);
                }
            }
        }
    }

    /// Facts ordered by priority, newest first among equals.
    pub fn snapshot(&self) -> Vec<Fact> {
        let mut facts: Vec<Fact> = self.entries.values().cloned().collect();
        facts.sort_by(|a, b| b.priority.cmp(&a.priority).then(b.seq.cmp(&a.seq)));
        facts
    }

    /// `- key: value` lines in snapshot order, stopping before `max_chars`.
    pub fn render(&self, max_chars: usize) -> String {
        let mut out = String::new();
        for fact in self.snapshot() {
            let line = format!("- {}: {}\n", fact.key, fact.value);
            if out.chars().count() + line.chars().count() > max_chars {
                break;
            }
            out.push_str(&line);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn duplicate_values_under_new_keys_are_rejected() {
        let mut ledger = FactLedger::new(10);
        assert!(ledger.put("entry", "Main class is src/App.java"));
        assert!(!ledger.put("other", "  main CLASS is   src/App.java "));
        assert_eq!(ledger.len(), 1);
        // same key may restate the value
        assert!(ledger.put("entry", "Main class is src/App.java"));
    }

    #[test]
    fn short_values_skip_dedup() {
        let mut ledger = FactLedger::new(10);
        assert!(ledger.put("a", "yes"));
        assert!(ledger.put("b", "yes"));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn blank_input_is_ignored() {
        let mut ledger = FactLedger::new(10);
        assert!(!ledger.put(" ", "value here"));
        assert!(!ledger.put("key", "   "));
        assert!(ledger.is_empty());
    }

    #[test]
    fn priority_weights() {
        assert_eq!(estimate_priority("note", "nothing special"), 1);
        assert_eq!(estimate_priority("Plan", "look around"), 6);
        assert_eq!(estimate_priority("loc", "see src/main.rs"), 3);
        assert_eq!(estimate_priority("crash", "NullPointerException in Foo.java"), 4);
    }

    #[test]
    fn eviction_drops_lowest_priority_then_oldest() {
        let mut ledger = FactLedger::new(3);
        ledger.put("n1", "plain note one");
        ledger.put("n2", "plain note two");
        ledger.put("file", "lives in src/lib.rs");
        ledger.put("n3", "plain note three");
        assert_eq!(ledger.len(), 3);
        assert!(ledger.get("n1").is_none());
        assert!(ledger.get("file").is_some());
        assert!(ledger.get("n3").is_some());
    }

    #[test]
    fn overwrite_releases_the_old_fingerprint() {
        let mut ledger = FactLedger::new(10);
        ledger.put("k", "first value text");
        ledger.put("k", "second value text");
        assert!(ledger.put("other", "first value text"));
    }

    #[test]
    fn values_are_truncated() {
        let mut ledger = FactLedger::new(2);
        ledger.put("long", &"x".repeat(2000));
        assert_eq!(ledger.get("long").unwrap().chars().count(), 600);
    }

    #[test]
    fn render_orders_by_priority_and_respects_budget() {
        let mut ledger = FactLedger::new(10);
        ledger.put("note", "plain note");
        ledger.put("Plan", "read the parser first");
        let rendered = ledger.render(1000);
        assert!(rendered.starts_with("- Plan: read the parser first\n"));
        assert!(rendered.contains("- note: plain note"));
        assert_eq!(ledger.render(10), "");
    }

    #[test]
    fn merge_json_stringifies_non_strings() {
        let mut ledger = FactLedger::new(10);
        let accepted = ledger.merge_json(&json!({"count": 3, "path": "a.py", "skip": null}));
        assert_eq!(accepted, 2);
        assert_eq!(ledger.get("count"), Some("3"));
        assert_eq!(ledger.merge_json(&json!("not an object")), 0);
    }
}
