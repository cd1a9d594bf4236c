//! Defensive JSON recovery from model output.
//!
//! Models asked for "JSON only" still wrap responses in prose or markdown
//! fences often enough that recovery is an ordered chain of parser
//! strategies: direct parse, fenced code block, then a brace-matching
//! scan. First strategy that yields a valid object wins; total failure
//! is `None`, never an error.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

fn code_block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)```(?:json)?\s*(.*?)```").expect("valid code block regex")
    })
}

/// Recovers the first JSON object found in raw model output.
pub fn recover_json(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    if let Some(captures) = code_block_regex().captures(raw) {
        if let Some(block) = captures.get(1) {
            if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(block.as_str().trim())
            {
                return Some(value);
            }
        }
    }

    for candidate in balanced_objects(raw) {
        if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(&candidate) {
            return Some(value);
        }
    }

    None
}

/// Scans for top-level balanced `{...}` spans, tracking string-literal
/// state so braces inside quoted strings don't count.
fn balanced_objects(raw: &str) -> Vec<String> {
    let mut candidates = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escape = false;

    for (i, c) in raw.char_indices() {
        if in_string {
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        if let Some(s) = start.take() {
                            candidates.push(raw[s..=i].to_string());
                        }
                    }
                }
            }
            _ => {}
        }
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_direct_parse() {
        let value = recover_json(r#"{"amount": 5}"#).unwrap();
        assert_eq!(value, json!({"amount": 5}));
    }

    #[test]
    fn test_fenced_code_block() {
        let raw = "Here is the result:\n```json\n{\"amount\": 5}\n```\nDone.";
        let value = recover_json(raw).unwrap();
        assert_eq!(value, json!({"amount": 5}));
    }

    #[test]
    fn test_unfenced_prose_brace_scan() {
        let raw = "Sure! The extracted fields are {\"amount\": 5, \"source\": \"Shop\"} as requested.";
        let value = recover_json(raw).unwrap();
        assert_eq!(value["source"], json!("Shop"));
    }

    #[test]
    fn test_braces_inside_strings_ignored() {
        let raw = r#"noise {"note": "contains } and { braces", "amount": 3} trailing"#;
        let value = recover_json(raw).unwrap();
        assert_eq!(value["amount"], json!(3));
        assert_eq!(value["note"], json!("contains } and { braces"));
    }

    #[test]
    fn test_escaped_quotes_inside_strings() {
        let raw = r#"{"source": "Joe\"s {Diner}", "amount": 7}"#;
        let value = recover_json(raw).unwrap();
        assert_eq!(value["amount"], json!(7));
    }

    #[test]
    fn test_nested_objects_recovered_whole() {
        let raw = r#"prefix {"a": {"b": 1}, "c": 2} suffix"#;
        let value = recover_json(raw).unwrap();
        assert_eq!(value, json!({"a": {"b": 1}, "c": 2}));
    }

    #[test]
    fn test_first_valid_object_wins() {
        let raw = r#"{"broken": } then {"amount": 9}"#;
        let value = recover_json(raw).unwrap();
        assert_eq!(value, json!({"amount": 9}));
    }

    #[test]
    fn test_garbage_returns_none() {
        assert!(recover_json("").is_none());
        assert!(recover_json("   ").is_none());
        assert!(recover_json("no json here").is_none());
        assert!(recover_json("{never closed").is_none());
        assert!(recover_json("[1, 2, 3]").is_none());
    }
}
