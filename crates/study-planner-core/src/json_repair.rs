//! Best-effort repair of JSON returned by generative models.
//!
//! Models routinely wrap JSON in markdown fences, prepend prose, or leave
//! trailing commas. [`parse_lenient`] tries a strict parse first and then
//! applies, in order:
//!
//! 1. strip a leading UTF-8 BOM and markdown code fences;
//! 2. cut the text to the outermost `{...}` or `[...]` block;
//! 3. remove trailing commas before `}` / `]` (outside string literals).
//!
//! Only when all repairs fail is the response reported as malformed.

use serde_json::Value;
use thiserror::Error;

/// The response could not be turned into JSON even after repair.
#[derive(Debug, Error)]
#[error("response is not valid JSON after repair: {message}")]
pub struct JsonRepairError {
    pub message: String,
}

/// Parse `raw` as JSON, repairing common model formatting mistakes.
pub fn parse_lenient(raw: &str) -> Result<Value, JsonRepairError> {
    if let Ok(v) = serde_json::from_str::<Value>(raw) {
        return Ok(v);
    }

    let unfenced = strip_fences(raw.trim_start_matches('\u{feff}'));
    if let Ok(v) = serde_json::from_str::<Value>(unfenced) {
        return Ok(v);
    }

    let body = outermost_block(unfenced).unwrap_or(unfenced);
    let cleaned = remove_trailing_commas(body);
    serde_json::from_str::<Value>(&cleaned).map_err(|e| JsonRepairError {
        message: e.to_string(),
    })
}

/// Returns the content of the first fenced code block, or the input
/// unchanged when there is no fence.
fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed;
    };
    let after_open = &trimmed[open + 3..];
    // Skip the info string (e.g. `json`) up to the end of the line.
    let content_start = after_open.find('\n').map(|p| p + 1).unwrap_or(0);
    let content = &after_open[content_start..];
    match content.rfind("```") {
        Some(close) => content[..close].trim(),
        None => content.trim(),
    }
}

fn outermost_block(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let open = text[start..].chars().next()?;
    let close = if open == '{' { '}' } else { ']' };
    let end = text.rfind(close)?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

fn remove_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strict_json_passes_through() {
        assert_eq!(parse_lenient(r#"{"a":1}"#).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_strips_markdown_fences() {
        let raw = "Here you go:\n```json\n{\"topics\": [1, 2]}\n```\nHope it helps";
        assert_eq!(parse_lenient(raw).unwrap(), json!({"topics": [1, 2]}));
    }

    #[test]
    fn test_removes_trailing_commas() {
        let raw = "{\"a\": [1, 2, ], \"b\": {\"c\": 3,},}";
        assert_eq!(parse_lenient(raw).unwrap(), json!({"a": [1, 2], "b": {"c": 3}}));
    }

    #[test]
    fn test_keeps_commas_inside_strings() {
        let raw = "{\"t\": \"a ,}\", }";
        assert_eq!(parse_lenient(raw).unwrap(), json!({"t": "a ,}"}));
    }

    #[test]
    fn test_cuts_surrounding_prose() {
        let raw = "Sure! {\"ok\": true} Let me know.";
        assert_eq!(parse_lenient(raw).unwrap(), json!({"ok": true}));
    }

    #[test]
    fn test_unrepairable_text_fails() {
        assert!(parse_lenient("I cannot help with that").is_err());
        assert!(parse_lenient("{\"a\": ").is_err());
    }
}
