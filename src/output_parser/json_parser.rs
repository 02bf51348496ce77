use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value as Json;

use super::OutputParseError;

static JSON_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```json[ \t]*\r?\n([\s\S]*?)```").expect("static regex is valid")
});

/// Extracts the JSON document from a response: a fenced ```json block if
/// present, otherwise the first top-level balanced object or array.
pub fn extract_json(response: &str) -> Result<Json, OutputParseError> {
    if let Some(cap) = JSON_BLOCK_RE.captures(response) {
        return Ok(serde_json::from_str(cap[1].trim())?);
    }
    let candidate = first_balanced(response).ok_or(OutputParseError::NoJson)?;
    Ok(serde_json::from_str(candidate)?)
}

/// Scans for the first `{…}` or `[…]` with balanced delimiters, respecting
/// string literals and escapes.
fn first_balanced(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = bytes.iter().position(|b| *b == b'{' || *b == b'[')?;
    let open = bytes[start];
    let close = if open == b'{' { b'}' } else { b']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b if b == open => depth += 1,
            b if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fenced_json_block() {
        let response = "Here you go:\n```json\n{\"a\": 1}\n```";
        assert_eq!(extract_json(response).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_bare_object_with_prose() {
        let response = "The answer is {\"result\": [1, 2]} as requested.";
        assert_eq!(extract_json(response).unwrap(), json!({"result": [1, 2]}));
    }

    #[test]
    fn test_braces_inside_strings_do_not_confuse_scan() {
        let response = r#"{"text": "closing } inside", "n": 1}"#;
        assert_eq!(
            extract_json(response).unwrap(),
            json!({"text": "closing } inside", "n": 1})
        );
    }

    #[test]
    fn test_escaped_quotes() {
        let response = r#"{"text": "quote \" and } brace"}"#;
        assert!(extract_json(response).is_ok());
    }

    #[test]
    fn test_top_level_array() {
        assert_eq!(extract_json("[1, 2, 3]").unwrap(), json!([1, 2, 3]));
    }

    #[test]
    fn test_no_json_at_all() {
        assert!(matches!(
            extract_json("plain prose"),
            Err(OutputParseError::NoJson)
        ));
    }

    #[test]
    fn test_unbalanced_is_error() {
        assert!(extract_json("{\"a\": 1").is_err());
    }
}
