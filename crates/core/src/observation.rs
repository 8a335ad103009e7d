//! Schema-free access to tool arguments and observations.
//!
//! Models and tools exchange loosely shaped JSON. Optional fields have three
//! states that matter: absent, explicitly `null`, and present. [`Field`]
//! keeps them apart instead of collapsing everything into `Option`.

use serde_json::Value;

/// One field looked up on a JSON object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Field<'a> {
    Missing,
    Null,
    Present(&'a Value),
}

impl<'a> Field<'a> {
    /// Look up `key` on `value`. Non-objects have no fields.
    pub fn of(value: &'a Value, key: &str) -> Self {
        match value.get(key) {
            None => Field::Missing,
            Some(Value::Null) => Field::Null,
            Some(v) => Field::Present(v),
        }
    }

    /// First key of `keys` that is present, `Null` if one was null, else `Missing`.
    pub fn first_of(value: &'a Value, keys: &[&str]) -> Self {
        let mut saw_null = false;
        for key in keys {
            match Field::of(value, key) {
                Field::Present(v) => return Field::Present(v),
                Field::Null => saw_null = true,
                Field::Missing => {}
            }
        }
        if saw_null { Field::Null } else { Field::Missing }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Field::Missing)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Field::Null)
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Field::Present(_))
    }

    pub fn value(&self) -> Option<&'a Value> {
        match self {
            Field::Present(v) => Some(v),
            _ => None,
        }
    }

    /// The string payload, only when the field holds a JSON string.
    pub fn as_str(&self) -> Option<&'a str> {
        self.value().and_then(Value::as_str)
    }

    /// The trimmed string payload when it is non-empty.
    pub fn non_empty_str(&self) -> Option<&'a str> {
        self.as_str().map(str::trim).filter(|s| !s.is_empty())
    }

    /// Scalar rendered as text: strings verbatim, numbers and booleans
    /// formatted, everything else empty.
    pub fn text(&self) -> String {
        match self.value() {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => String::new(),
        }
    }

    /// Integer payload. Numeric strings are accepted since models often quote numbers.
    pub fn as_i64(&self) -> Option<i64> {
        match self.value()? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.value()? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.trim() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Whether a string-valued field holds something other than whitespace.
fn has_text(value: &Value, key: &str) -> bool {
    Field::of(value, key).non_empty_str().is_some()
}

/// Classify an already-parsed observation.
pub fn is_error_value(obs: &Value) -> bool {
    if !obs.is_object() {
        return true;
    }
    if Field::of(obs, "status").as_str() == Some("error") {
        return true;
    }
    if has_text(obs, "error") {
        return true;
    }
    if let Some(result) = Field::of(obs, "result").value() {
        if has_text(result, "error") {
            return true;
        }
        if Field::of(result, "success").as_bool() == Some(false) {
            return true;
        }
    }
    false
}

/// Classify a raw observation string. Empty or unparsable observations
/// count as errors.
pub fn is_tool_error(obs: &str) -> bool {
    if obs.trim().is_empty() {
        return true;
    }
    match serde_json::from_str::<Value>(obs) {
        Ok(value) => is_error_value(&value),
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_distinguishes_missing_null_present() {
        let v = json!({"a": null, "b": 3, "c": "x"});
        assert!(Field::of(&v, "zz").is_missing());
        assert!(Field::of(&v, "a").is_null());
        assert_eq!(Field::of(&v, "b").as_i64(), Some(3));
        assert_eq!(Field::of(&v, "c").text(), "x");
        assert_eq!(Field::of(&v, "a").text(), "");
    }

    #[test]
    fn first_of_prefers_present_then_null() {
        let v = json!({"start_line": 7, "startLine": null});
        assert_eq!(Field::first_of(&v, &["startLine", "start_line"]).as_i64(), Some(7));
        let v = json!({"startLine": null});
        assert!(Field::first_of(&v, &["startLine", "start_line"]).is_null());
        assert!(Field::first_of(&json!({}), &["x"]).is_missing());
    }

    #[test]
    fn numeric_strings_parse() {
        let v = json!({"n": " 42 ", "b": "true"});
        assert_eq!(Field::of(&v, "n").as_i64(), Some(42));
        assert_eq!(Field::of(&v, "b").as_bool(), Some(true));
    }

    #[test]
    fn classifies_error_shapes() {
        assert!(is_tool_error(""));
        assert!(is_tool_error("not json"));
        assert!(is_tool_error("[1,2]"));
        assert!(is_tool_error(r#"{"tool":"GREP","status":"error"}"#));
        assert!(is_tool_error(r#"{"tool":"GREP","error":"bad_regex"}"#));
        assert!(is_tool_error(r#"{"tool":"READ_FILE","result":{"error":"not_a_file"}}"#));
        assert!(is_tool_error(r#"{"tool":"EDIT_FILE","result":{"success":false}}"#));
    }

    #[test]
    fn classifies_success_shapes() {
        assert!(!is_tool_error(r#"{"tool":"GREP","status":"ok","result":{"matches":[]}}"#));
        assert!(!is_tool_error(r#"{"tool":"READ_FILE","error":"","result":{"error":null}}"#));
        assert!(!is_tool_error(r#"{"tool":"EDIT_FILE","result":{"success":true}}"#));
    }
}
