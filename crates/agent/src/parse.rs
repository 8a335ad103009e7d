//! Model output parsing and intent classification.
//!
//! Models wrap their JSON in prose or markdown fences often enough that the
//! loop extracts the first balanced `{...}` object before parsing. A parsed
//! object is then classified into a [`Decision`].

use codeagent_core::observation::Field;
use codeagent_core::text::truncate;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("no JSON object found in model output")]
    NoObject,

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("top-level JSON value is not an object")]
    NotAnObject,
}

/// Hard protocol violations. Their `Display` text is returned verbatim as
/// the run's answer.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("Model output protocol error: type={kind} raw={raw}")]
    UnknownType { kind: String, raw: String },

    #[error("Model output protocol error: type=tool but tool/args missing")]
    MissingToolOrArgs,

    #[error("Model output protocol error: could not parse JSON after {attempts} attempts ({reason})")]
    Unparsable { attempts: usize, reason: String },
}

/// What the model asked for this turn.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Tool {
        tool: String,
        version: Option<String>,
        args: Value,
        thought: Option<String>,
        facts: Option<Value>,
    },
    Final {
        answer: String,
        thought: Option<String>,
        facts: Option<Value>,
    },
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // drop the info string ("json") up to the first newline
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or(rest);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// The first balanced JSON object in `raw`, honoring string literals and
/// escapes so braces inside strings do not confuse the scan.
pub fn extract_first_json_object(raw: &str) -> Option<&str> {
    let text = strip_fences(raw);
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse model output into a JSON object.
pub fn parse_json_object(raw: &str) -> Result<Value, ParseError> {
    let candidate = extract_first_json_object(raw).ok_or(ParseError::NoObject)?;
    let value: Value = serde_json::from_str(candidate).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(ParseError::NotAnObject)
    }
}

/// Classify a parsed object. `type=final` naming a tool is treated as a
/// tool call.
pub fn classify(node: &Value, raw: &str) -> Result<Decision, ProtocolError> {
    let kind = Field::of(node, "type").text().trim().to_lowercase();
    let tool = Field::of(node, "tool").non_empty_str();
    let thought = Field::of(node, "thought").non_empty_str().map(str::to_string);
    let facts = Field::of(node, "facts").value().cloned();

    let is_tool = kind == "tool" || (kind == "final" && tool.is_some());
    if is_tool {
        let args = Field::of(node, "args").value().filter(|a| a.is_object());
        return match (tool, args) {
            (Some(tool), Some(args)) => Ok(Decision::Tool {
                tool: tool.to_string(),
                version: Field::of(node, "version").non_empty_str().map(str::to_string),
                args: args.clone(),
                thought,
                facts,
            }),
            _ => Err(ProtocolError::MissingToolOrArgs),
        };
    }
    if kind == "final" {
        let answer = Field::first_of(node, &["finalAnswer", "final_answer", "answer", "content"])
            .non_empty_str()
            .map(str::to_string)
            .unwrap_or_else(|| raw.trim().to_string());
        return Ok(Decision::Final { answer, thought, facts });
    }
    Err(ProtocolError::UnknownType {
        kind,
        raw: truncate(raw, 800).to_string(),
    })
}

/// Lenient read of a forced-final response: the `finalAnswer` when the
/// output parses, else the raw text.
pub fn lenient_final_answer(raw: &str) -> String {
    parse_json_object(raw)
        .ok()
        .and_then(|node| {
            Field::first_of(&node, &["finalAnswer", "final_answer", "answer", "content"])
                .non_empty_str()
                .map(str::to_string)
        })
        .unwrap_or_else(|| raw.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_from_fences_and_prose() {
        let raw = "```json\n{\"type\":\"final\",\"finalAnswer\":\"ok\"}\n```";
        assert_eq!(extract_first_json_object(raw), Some("{\"type\":\"final\",\"finalAnswer\":\"ok\"}"));

        let raw = "Sure! Here you go: {\"a\": {\"b\": 1}} and some trailing {text}";
        assert_eq!(extract_first_json_object(raw), Some("{\"a\": {\"b\": 1}}"));
    }

    #[test]
    fn braces_inside_strings_are_ignored() {
        let raw = r#"{"type":"final","finalAnswer":"use } and \" { carefully"}"#;
        let node = parse_json_object(raw).unwrap();
        assert_eq!(node["finalAnswer"], "use } and \" { carefully");
    }

    #[test]
    fn parse_errors() {
        assert_eq!(parse_json_object("no json here"), Err(ParseError::NoObject));
        assert!(matches!(parse_json_object("{\"a\": }"), Err(ParseError::InvalidJson(_))));
        assert_eq!(parse_json_object("{\"unterminated\": 1"), Err(ParseError::NoObject));
    }

    #[test]
    fn tool_decision() {
        let node = json!({"type": "tool", "tool": "READ_FILE", "args": {"path": "a.py"}, "thought": "look", "facts": {}});
        match classify(&node, "").unwrap() {
            Decision::Tool { tool, version, args, thought, facts } => {
                assert_eq!(tool, "READ_FILE");
                assert!(version.is_none());
                assert_eq!(args["path"], "a.py");
                assert_eq!(thought.as_deref(), Some("look"));
                assert!(facts.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn final_naming_a_tool_becomes_a_tool_call() {
        let node = json!({"type": "final", "tool": "GREP", "args": {"pattern": "x"}});
        assert!(matches!(classify(&node, ""), Ok(Decision::Tool { .. })));
    }

    #[test]
    fn final_answer_falls_back_to_raw() {
        let node = json!({"type": "FINAL"});
        let decision = classify(&node, "  {\"type\":\"FINAL\"} ").unwrap();
        assert_eq!(
            decision,
            Decision::Final { answer: "{\"type\":\"FINAL\"}".into(), thought: None, facts: None }
        );
    }

    #[test]
    fn protocol_errors() {
        let err = classify(&json!({"type": "tool", "tool": "GREP"}), "").unwrap_err();
        assert_eq!(err.to_string(), "Model output protocol error: type=tool but tool/args missing");

        let raw = "x".repeat(1000);
        let err = classify(&json!({"type": "chat"}), &raw).unwrap_err();
        let text = err.to_string();
        assert!(text.starts_with("Model output protocol error: type=chat raw="));
        assert_eq!(text.len(), "Model output protocol error: type=chat raw=".len() + 800);
    }

    #[test]
    fn lenient_final() {
        assert_eq!(lenient_final_answer("{\"type\":\"final\",\"finalAnswer\":\"done\"}"), "done");
        assert_eq!(lenient_final_answer("plain words"), "plain words");
    }
}
