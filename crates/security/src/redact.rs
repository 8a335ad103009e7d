//! Sensitive-value masking for tool observations.
//!
//! Anything that looks like `password = hunter2` or `"apiKey": "abc"` is
//! rewritten to `******` before it can be echoed into a prompt.

use regex::Regex;
use std::sync::LazyLock;

const MASK: &str = "******";

static JSON_PAIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)("(?:password|passwd|secret|token|apiKey|api_key|accessKey|access_key|secretKey|secret_key)"\s*:\s*")([^"]{1,160})(")"#,
    )
    .expect("static regex")
});

static ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)(password|passwd|secret|token|apikey|api_key|accesskey|access_key|secretkey|secret_key)\s*[:=]\s*(?:\\"[^"'\\\r\n\s]{1,160}\\"|"[^"'\\\r\n\s]{1,160}"|'[^"'\\\r\n\s]{1,160}'|[^"'\\\r\n\s]{1,160})"#,
    )
    .expect("static regex")
});

/// Mask credential-looking values in `text`.
pub fn redact_sensitive(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let masked = JSON_PAIR.replace_all(text, format!("${{1}}{MASK}${{3}}").as_str());
    ASSIGNMENT
        .replace_all(&masked, format!("${{1}}:{MASK}").as_str())
        .into_owned()
}
