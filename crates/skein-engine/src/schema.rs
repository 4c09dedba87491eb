//! Minimal structural JSON schema validation.
//!
//! Supports the subset the engine needs for gate inputs and turn output
//! schemas: `type`, `enum`, `required`, `properties`, and `items`. Violations
//! carry the dot path to the offending value so retry prompts and gate
//! failures can point at the exact field.

use serde_json::Value;

/// One schema violation at a specific location in the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Dot path to the value, `"$"` for the root.
    pub path: String,
    pub message: String,
}

impl Violation {
    fn at(path: &str, message: impl Into<String>) -> Self {
        Violation {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Validate `value` against `schema`, collecting every violation.
pub fn validate(value: &Value, schema: &Value) -> Vec<Violation> {
    let mut violations = Vec::new();
    validate_at(value, schema, "$", &mut violations);
    violations
}

fn validate_at(value: &Value, schema: &Value, path: &str, out: &mut Vec<Violation>) {
    let Some(schema) = schema.as_object() else {
        return;
    };

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.iter().any(|candidate| candidate == value) {
            let rendered: Vec<String> = allowed.iter().map(Value::to_string).collect();
            out.push(Violation::at(
                path,
                format!("value must be one of [{}]", rendered.join(", ")),
            ));
            return;
        }
    }

    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        if !type_matches(value, expected) {
            out.push(Violation::at(
                path,
                format!("expected type '{expected}', got '{}'", type_name(value)),
            ));
            return;
        }
    }

    if let Some(object) = value.as_object() {
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for field in required.iter().filter_map(Value::as_str) {
                if !object.contains_key(field) {
                    out.push(Violation::at(
                        path,
                        format!("missing required field '{field}'"),
                    ));
                }
            }
        }
        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (key, sub_schema) in properties {
                if let Some(sub_value) = object.get(key) {
                    let sub_path = format!("{path}.{key}");
                    validate_at(sub_value, sub_schema, &sub_path, out);
                }
            }
        }
    }

    if let Some(items) = value.as_array() {
        if let Some(item_schema) = schema.get("items") {
            for (index, item) in items.iter().enumerate() {
                let sub_path = format!("{path}[{index}]");
                validate_at(item, item_schema, &sub_path, out);
            }
        }
    }
}

fn type_matches(value: &Value, expected: &str) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.as_i64().is_some() || value.as_u64().is_some(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_matching_object() {
        let schema = json!({
            "type": "object",
            "required": ["name", "score"],
            "properties": {
                "name": { "type": "string" },
                "score": { "type": "number" }
            }
        });
        let value = json!({ "name": "alpha", "score": 0.9 });
        assert!(validate(&value, &schema).is_empty());
    }

    #[test]
    fn reports_missing_required_fields() {
        let schema = json!({ "type": "object", "required": ["a", "b"] });
        let violations = validate(&json!({ "a": 1 }), &schema);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, "$");
        assert!(violations[0].message.contains("'b'"));
    }

    #[test]
    fn reports_type_mismatch_with_paths() {
        let schema = json!({
            "type": "object",
            "properties": { "count": { "type": "integer" } }
        });
        let violations = validate(&json!({ "count": "three" }), &schema);
        assert_eq!(violations[0].path, "$.count");
        assert!(violations[0].message.contains("integer"));
    }

    #[test]
    fn integer_rejects_fractional_number() {
        let schema = json!({ "type": "integer" });
        assert!(validate(&json!(3), &schema).is_empty());
        assert!(!validate(&json!(3.5), &schema).is_empty());
    }

    #[test]
    fn enum_constrains_values() {
        let schema = json!({ "enum": ["PASS", "REJECT"] });
        assert!(validate(&json!("PASS"), &schema).is_empty());
        let violations = validate(&json!("MAYBE"), &schema);
        assert!(violations[0].message.contains("PASS"));
    }

    #[test]
    fn items_validates_each_element() {
        let schema = json!({ "type": "array", "items": { "type": "string" } });
        let violations = validate(&json!(["ok", 5, "ok", null]), &schema);
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0].path, "$[1]");
        assert_eq!(violations[1].path, "$[3]");
    }

    #[test]
    fn nested_paths_compose() {
        let schema = json!({
            "type": "object",
            "properties": {
                "claims": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["text"]
                    }
                }
            }
        });
        let violations = validate(&json!({ "claims": [{ "text": "x" }, {}] }), &schema);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, "$.claims[1]");
    }
}
