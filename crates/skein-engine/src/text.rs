//! Small helpers shared across executors: dot-path lookup, text extraction
//! from output envelopes, and character-budget truncation.

use serde_json::Value;

/// Look up a value by dot path, e.g. `"artifact.payload.score"`. Numeric
/// segments index into arrays.
pub fn get_by_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Render a value as display text. Strings pass through unquoted, everything
/// else is pretty-printed JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Pull human-readable text out of a node output. Output envelopes carry a
/// `text` field next to the structured artifact; plain strings and other
/// values fall back to [`stringify`].
pub fn extract_text(value: &Value) -> String {
    if let Some(text) = value.get("text").and_then(Value::as_str) {
        return text.to_string();
    }
    stringify(value)
}

/// Truncate to a character budget. Returns the (possibly shortened) text and
/// whether truncation happened.
pub fn truncate_chars(text: &str, max_chars: usize) -> (String, bool) {
    if text.chars().count() <= max_chars {
        return (text.to_string(), false);
    }
    let cut: String = text.chars().take(max_chars).collect();
    (cut, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn path_walks_objects_and_arrays() {
        let value = json!({ "a": { "b": [ { "c": 42 } ] } });
        assert_eq!(get_by_path(&value, "a.b.0.c"), Some(&json!(42)));
        assert_eq!(get_by_path(&value, "a.b.1.c"), None);
        assert_eq!(get_by_path(&value, "a.missing"), None);
    }

    #[test]
    fn path_root_is_identity() {
        let value = json!("leaf");
        assert_eq!(get_by_path(&value, ""), Some(&json!("leaf")));
    }

    #[test]
    fn stringify_passes_strings_through() {
        assert_eq!(stringify(&json!("hello")), "hello");
        assert!(stringify(&json!({ "k": 1 })).contains("\"k\""));
    }

    #[test]
    fn extract_text_prefers_text_field() {
        let value = json!({ "text": "summary", "artifact": { "x": 1 } });
        assert_eq!(extract_text(&value), "summary");
        assert_eq!(extract_text(&json!("plain")), "plain");
    }

    #[test]
    fn truncate_respects_char_budget() {
        let (text, truncated) = truncate_chars("abcdef", 4);
        assert_eq!(text, "abcd");
        assert!(truncated);
        let (text, truncated) = truncate_chars("abc", 4);
        assert_eq!(text, "abc");
        assert!(!truncated);
    }
}
