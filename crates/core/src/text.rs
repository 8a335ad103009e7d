//! Character-based string helpers.
//!
//! Every budget in the loop is counted in characters, never bytes, so
//! slicing must always land on a char boundary.

/// Number of characters in `s`.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// The first `max_chars` characters of `s`.
pub fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Like [`truncate`], appending `suffix` only when something was cut.
pub fn truncate_with(s: &str, max_chars: usize, suffix: &str) -> String {
    let head = truncate(s, max_chars);
    if head.len() == s.len() {
        s.to_string()
    } else {
        format!("{head}{suffix}")
    }
}

/// Trim and squeeze every run of whitespace into a single space.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split on `\n` keeping a trailing empty segment, the way line-oriented
/// edits need it ("a\n" is two lines: "a" and "").
pub fn split_lines(content: &str) -> Vec<&str> {
    content.split('\n').collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
        assert_eq!(truncate("", 3), "");
    }

    #[test]
    fn truncate_with_only_suffixes_when_cut() {
        assert_eq!(truncate_with("abcdef", 3, "..."), "abc...");
        assert_eq!(truncate_with("abc", 3, "..."), "abc");
    }

    #[test]
    fn collapse_whitespace_squeezes_runs() {
        assert_eq!(collapse_whitespace("  a \t b\n\nc "), "a b c");
    }

    #[test]
    fn split_lines_keeps_trailing_segment() {
        assert_eq!(split_lines("a\n"), vec!["a", ""]);
        assert_eq!(split_lines(""), vec![""]);
    }
}
