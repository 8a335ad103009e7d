//! Tool-call fingerprints for dedup and loop detection.
//!
//! A signature is `TOOL@version|field=value|...` over the fields that
//! change what a tool returns. Key order, alias spelling (`start_line` vs
//! `startLine`) and surrounding whitespace do not affect it. Tools without
//! a field list fall back to a hash of the canonicalized arguments.

use codeagent_core::observation::Field;
use codeagent_core::text::truncate;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Signature fields per tool: (label, accepted argument keys).
type FieldSpec = (&'static str, &'static [&'static str]);

const SEARCH_KNOWLEDGE_FIELDS: &[FieldSpec] = &[("query", &["query"]), ("topK", &["topK", "top_k"])];

const LIST_FILES_FIELDS: &[FieldSpec] = &[
    ("path", &["path"]),
    ("glob", &["glob", "pattern"]),
    ("maxResults", &["maxResults", "max_results"]),
    ("maxDepth", &["maxDepth", "max_depth"]),
];

const GREP_FIELDS: &[FieldSpec] = &[
    ("root", &["root", "path"]),
    ("file_glob", &["file_glob", "fileGlob", "glob"]),
    ("maxMatches", &["maxMatches", "max_matches"]),
    ("maxFiles", &["maxFiles", "max_files"]),
    ("contextLines", &["contextLines", "context_lines"]),
    ("pattern", &["pattern", "query"]),
];

const READ_FILE_FIELDS: &[FieldSpec] = &[
    ("path", &["path", "file_path", "filePath"]),
    ("startLine", &["startLine", "start_line"]),
    ("endLine", &["endLine", "end_line"]),
];

const EDIT_OLD_KEYS: &[&str] = &["old_str", "oldStr", "old_text", "oldText"];
const EDIT_NEW_KEYS: &[&str] = &["new_str", "newStr", "new_text", "newText"];

fn field_text(args: &Value, keys: &[&str]) -> String {
    Field::first_of(args, keys).text().trim().to_string()
}

fn fielded(head: &str, args: &Value, fields: &[FieldSpec]) -> String {
    let mut out = head.to_string();
    for (label, keys) in fields {
        let mut value = field_text(args, keys);
        if *label == "topK" && value.is_empty() {
            value = "5".into();
        }
        out.push('|');
        out.push_str(label);
        out.push('=');
        out.push_str(&value);
    }
    out
}

/// Signature of one tool call.
pub fn tool_signature(tool: &str, version: &str, args: &Value) -> String {
    let head = format!("{tool}@{version}");
    match tool {
        "SEARCH_KNOWLEDGE" => fielded(&head, args, SEARCH_KNOWLEDGE_FIELDS),
        "LIST_FILES" => fielded(&head, args, LIST_FILES_FIELDS),
        "GREP" => fielded(&head, args, GREP_FIELDS),
        "READ_FILE" => fielded(&head, args, READ_FILE_FIELDS),
        "EDIT_FILE" => {
            let path = field_text(args, &["path", "file_path", "filePath"]);
            let dry_run = Field::first_of(args, &["dryRun", "dry_run"]).as_bool().unwrap_or(false);
            // edit text is hashed whole: whitespace inside it is material
            let old = Field::first_of(args, EDIT_OLD_KEYS).text();
            let new = Field::first_of(args, EDIT_NEW_KEYS).text();
            format!(
                "{head}|path={path}|dry_run={dry_run}|old_head={}|edit={}",
                truncate(&old, 50),
                &sha256_hex(&format!("{old}\u{0}{new}"))[..16]
            )
        }
        _ => format!("{head}|args={}", sha256_hex(&canonical_json(args).to_string())),
    }
}

/// Recursively sort object keys and trim string leaves.
pub fn canonical_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for key in keys {
                out.insert(key.clone(), canonical_json(&map[key]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical_json).collect()),
        Value::String(s) => Value::String(s.trim().to_string()),
        other => other.clone(),
    }
}

pub fn sha256_hex(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Digest of what a READ_FILE observation actually returned, used to tell
/// a genuine re-read loop from a file that changed underneath.
pub fn observation_digest(observation: &Value) -> String {
    let result = Field::of(observation, "result").value().cloned().unwrap_or(Value::Null);
    let error = Field::of(observation, "error").text();
    sha256_hex(&format!("{}\u{0}{error}", canonical_json(&result)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_and_aliases_do_not_matter() {
        let a = tool_signature("READ_FILE", "v1", &json!({"path": "src/a.rs", "startLine": 1, "endLine": 40}));
        let b = tool_signature(
            "READ_FILE",
            "v1",
            &json!({"end_line": 40, "start_line": 1, "path": "  src/a.rs "}),
        );
        assert_eq!(a, b);
        assert_eq!(a, "READ_FILE@v1|path=src/a.rs|startLine=1|endLine=40");
    }

    #[test]
    fn different_ranges_differ() {
        let a = tool_signature("READ_FILE", "v1", &json!({"path": "a", "startLine": 1}));
        let b = tool_signature("READ_FILE", "v1", &json!({"path": "a", "startLine": 200}));
        assert_ne!(a, b);
    }

    #[test]
    fn version_is_part_of_the_head() {
        let args = json!({"query": "login"});
        assert_ne!(
            tool_signature("SEARCH_KNOWLEDGE", "v1", &args),
            tool_signature("SEARCH_KNOWLEDGE", "v2", &args)
        );
    }

    #[test]
    fn top_k_defaults_to_five() {
        let implicit = tool_signature("SEARCH_KNOWLEDGE", "v1", &json!({"query": "login"}));
        let explicit = tool_signature("SEARCH_KNOWLEDGE", "v1", &json!({"query": "login", "top_k": 5}));
        assert_eq!(implicit, explicit);
    }

    #[test]
    fn edit_signature_covers_replacement_text() {
        let a = tool_signature("EDIT_FILE", "v1", &json!({"path": "a.py", "old_str": "x = 1", "new_str": "x = 2"}));
        let b = tool_signature("EDIT_FILE", "v1", &json!({"path": "a.py", "old_str": "x = 1", "new_str": "x = 3"}));
        assert_ne!(a, b);
        assert!(a.starts_with("EDIT_FILE@v1|path=a.py|dry_run=false|old_head=x = 1|edit="));

        let aliased = tool_signature("EDIT_FILE", "v1", &json!({"newText": "x = 2", "oldText": "x = 1", "path": " a.py"}));
        assert_eq!(a, aliased);
    }

    #[test]
    fn edit_preview_and_real_edit_differ() {
        let args = json!({"path": "a.py", "old_str": "def foo", "new_str": "def bar"});
        let mut preview = args.clone();
        preview["dry_run"] = json!(true);
        assert_ne!(
            tool_signature("EDIT_FILE", "v1", &args),
            tool_signature("EDIT_FILE", "v1", &preview)
        );
        let mut explicit = args.clone();
        explicit["dryRun"] = json!(false);
        assert_eq!(
            tool_signature("EDIT_FILE", "v1", &args),
            tool_signature("EDIT_FILE", "v1", &explicit)
        );
    }

    #[test]
    fn fallback_hash_ignores_key_order_and_whitespace() {
        let a = tool_signature("APPLY_PATCH", "v1", &json!({"patch": "x ", "dryRun": true}));
        let b = tool_signature("APPLY_PATCH", "v1", &json!({"dryRun": true, "patch": " x"}));
        let c = tool_signature("APPLY_PATCH", "v1", &json!({"dryRun": false, "patch": "x"}));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("APPLY_PATCH@v1|args="));
    }

    #[test]
    fn digest_changes_with_content() {
        let a = json!({"tool": "READ_FILE", "tookMs": 3, "result": {"content": "1→a"}, "error": null});
        let b = json!({"tool": "READ_FILE", "tookMs": 9, "result": {"content": "1→a"}, "error": null});
        let c = json!({"tool": "READ_FILE", "result": {"content": "1→b"}});
        assert_eq!(observation_digest(&a), observation_digest(&b));
        assert_ne!(observation_digest(&a), observation_digest(&c));
    }
}
