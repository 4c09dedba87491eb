//! Gate node execution: branch routing on a PASS/REJECT decision.
//!
//! The decision is read from the configured dot path (default `"DECISION"`,
//! with an opposite-case fallback), then from a JSON-text regex over the
//! stringified input, and finally from bare PASS/REJECT keywords. The
//! routing records which fallback produced the decision, so the gate's
//! decision output can surface it downstream.

use serde_json::Value;

use crate::graph::GateConfig;
use crate::schema;
use crate::text::get_by_path;

pub const DEFAULT_DECISION_PATH: &str = "DECISION";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Pass,
    Reject,
}

impl GateDecision {
    pub fn label(&self) -> &'static str {
        match self {
            GateDecision::Pass => "PASS",
            GateDecision::Reject => "REJECT",
        }
    }
}

/// Where a gate routed and what it pruned.
#[derive(Debug, Clone)]
pub struct GateRouting {
    pub decision: GateDecision,
    /// The child the accepted branch continues through, if the graph has one.
    pub accepted_target: Option<String>,
    /// The child whose branch is pruned into the skip set, if any.
    pub pruned_target: Option<String>,
    /// Set when the decision came from a fallback rather than the
    /// configured path.
    pub fallback_note: Option<String>,
}

/// Evaluate a gate against its input. `children` are the gate's outgoing
/// targets in authoring order.
pub fn run_gate(
    config: &GateConfig,
    input: &Value,
    children: &[String],
) -> Result<GateRouting, String> {
    if let Some(raw_schema) = config.schema_json.as_deref() {
        let parsed: Value = serde_json::from_str(raw_schema)
            .map_err(|err| format!("gate schema_json is not valid JSON: {err}"))?;
        let violations = schema::validate(input, &parsed);
        if !violations.is_empty() {
            let summary: Vec<String> = violations.iter().map(|v| v.to_string()).collect();
            return Err(format!("gate input failed schema: {}", summary.join("; ")));
        }
    }

    let (decision, fallback_note) = extract_decision(config, input)
        .ok_or_else(|| "gate input carries no PASS/REJECT decision".to_string())?;

    let pass_target = config
        .pass_node_id
        .clone()
        .or_else(|| children.first().cloned());
    let reject_target = config
        .reject_node_id
        .clone()
        .or_else(|| children.get(1).cloned());

    let (accepted_target, pruned_target) = match decision {
        GateDecision::Pass => (pass_target, reject_target),
        GateDecision::Reject => (reject_target, pass_target),
    };

    Ok(GateRouting {
        decision,
        accepted_target,
        pruned_target,
        fallback_note,
    })
}

fn extract_decision(config: &GateConfig, input: &Value) -> Option<(GateDecision, Option<String>)> {
    let path = config
        .decision_path
        .as_deref()
        .filter(|p| !p.is_empty())
        .unwrap_or(DEFAULT_DECISION_PATH);

    // Path lookup, then the opposite-cased path as a fallback.
    if let Some(value) = get_by_path(input, path) {
        if let Some(decision) = parse_decision_value(value) {
            return Some((decision, None));
        }
    }
    let flipped = flip_case(path);
    if let Some(value) = get_by_path(input, &flipped) {
        if let Some(decision) = parse_decision_value(value) {
            return Some((decision, Some(format!("read from path {flipped}"))));
        }
    }

    let rendered = input.to_string();

    // `"DECISION": "PASS"` anywhere in the serialized input. Quotes may be
    // escaped when the decision sits inside a string value.
    let pattern = format!(
        r#"(?i)\\?"{}\\?"\s*:\s*\\?"(PASS|REJECT)\\?""#,
        regex::escape(path)
    );
    if let Ok(re) = regex::Regex::new(&pattern) {
        if let Some(captures) = re.captures(&rendered) {
            if let Some(decision) = parse_decision_text(&captures[1]) {
                return Some((decision, Some("matched in serialized input".into())));
            }
        }
    }

    // Bare keyword fallback. REJECT wins over PASS when both appear.
    if regex_hit(r"\bREJECT\b", &rendered) {
        return Some((GateDecision::Reject, Some("bare keyword".into())));
    }
    if regex_hit(r"\bPASS\b", &rendered) {
        return Some((GateDecision::Pass, Some("bare keyword".into())));
    }
    None
}

/// The value a gate stores as its own output: the decision, any fallback
/// note, and the judged input for downstream nodes.
pub fn decision_output(routing: &GateRouting, input: &Value) -> Value {
    let mut output = serde_json::Map::new();
    output.insert(
        "decision".into(),
        Value::String(routing.decision.label().to_string()),
    );
    if let Some(note) = &routing.fallback_note {
        output.insert(
            "fallback".into(),
            serde_json::json!({ "decision": note }),
        );
    }
    output.insert("input".into(), input.clone());
    Value::Object(output)
}

fn flip_case(path: &str) -> String {
    if path.chars().any(|c| c.is_lowercase()) {
        path.to_uppercase()
    } else {
        path.to_lowercase()
    }
}

fn parse_decision_value(value: &Value) -> Option<GateDecision> {
    value.as_str().and_then(parse_decision_text)
}

fn parse_decision_text(text: &str) -> Option<GateDecision> {
    match text.trim().to_uppercase().as_str() {
        "PASS" => Some(GateDecision::Pass),
        "REJECT" => Some(GateDecision::Reject),
        _ => None,
    }
}

fn regex_hit(pattern: &str, haystack: &str) -> bool {
    regex::Regex::new(pattern)
        .map(|re| re.is_match(haystack))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn children() -> Vec<String> {
        vec!["on_pass".to_string(), "on_reject".to_string()]
    }

    #[test]
    fn reads_decision_from_default_path() {
        let routing = run_gate(
            &GateConfig::default(),
            &json!({ "DECISION": "PASS" }),
            &children(),
        )
        .unwrap();
        assert_eq!(routing.decision, GateDecision::Pass);
        assert_eq!(routing.accepted_target.as_deref(), Some("on_pass"));
        assert_eq!(routing.pruned_target.as_deref(), Some("on_reject"));
        assert!(routing.fallback_note.is_none());
    }

    #[test]
    fn reject_routes_to_second_child() {
        let routing = run_gate(
            &GateConfig::default(),
            &json!({ "DECISION": "REJECT" }),
            &children(),
        )
        .unwrap();
        assert_eq!(routing.decision, GateDecision::Reject);
        assert_eq!(routing.accepted_target.as_deref(), Some("on_reject"));
        assert_eq!(routing.pruned_target.as_deref(), Some("on_pass"));
    }

    #[test]
    fn opposite_case_path_fallback() {
        let routing = run_gate(
            &GateConfig::default(),
            &json!({ "decision": "reject" }),
            &children(),
        )
        .unwrap();
        assert_eq!(routing.decision, GateDecision::Reject);
    }

    #[test]
    fn custom_decision_path() {
        let config = GateConfig {
            decision_path: Some("review.verdict".into()),
            ..GateConfig::default()
        };
        let routing = run_gate(
            &config,
            &json!({ "review": { "verdict": "PASS" } }),
            &children(),
        )
        .unwrap();
        assert_eq!(routing.decision, GateDecision::Pass);
    }

    #[test]
    fn regex_fallback_over_serialized_text() {
        // Decision buried in a text blob rather than a structured field.
        let input = json!({ "text": "analysis done. \"DECISION\": \"REJECT\" applies." });
        let routing = run_gate(&GateConfig::default(), &input, &children()).unwrap();
        assert_eq!(routing.decision, GateDecision::Reject);
    }

    #[test]
    fn keyword_fallback_prefers_reject() {
        let input = json!("the draft would PASS except one claim, so REJECT");
        let routing = run_gate(&GateConfig::default(), &input, &children()).unwrap();
        assert_eq!(routing.decision, GateDecision::Reject);
        assert_eq!(routing.fallback_note.as_deref(), Some("bare keyword"));
    }

    #[test]
    fn decision_output_embeds_input_and_fallback() {
        let input = json!({ "DECISION": "PASS", "draft": "text" });
        let routing = run_gate(&GateConfig::default(), &input, &children()).unwrap();
        let output = decision_output(&routing, &input);
        assert_eq!(output["decision"], "PASS");
        assert_eq!(output["input"]["draft"], "text");
        assert!(output.get("fallback").is_none());

        let keyword_input = json!("verdict: REJECT");
        let routing = run_gate(&GateConfig::default(), &keyword_input, &children()).unwrap();
        let output = decision_output(&routing, &keyword_input);
        assert_eq!(output["decision"], "REJECT");
        assert_eq!(output["fallback"]["decision"], "bare keyword");
    }

    #[test]
    fn no_decision_is_a_failure() {
        let err = run_gate(&GateConfig::default(), &json!({ "a": 1 }), &children()).unwrap_err();
        assert!(err.contains("decision"));
    }

    #[test]
    fn explicit_target_overrides_child_order() {
        let config = GateConfig {
            pass_node_id: Some("special".into()),
            ..GateConfig::default()
        };
        let routing = run_gate(&config, &json!({ "DECISION": "PASS" }), &children()).unwrap();
        assert_eq!(routing.accepted_target.as_deref(), Some("special"));
    }

    #[test]
    fn schema_violation_fails_the_gate() {
        let config = GateConfig {
            schema_json: Some(r#"{ "type": "object", "required": ["DECISION"] }"#.into()),
            ..GateConfig::default()
        };
        let err = run_gate(&config, &json!({ "other": 1 }), &children()).unwrap_err();
        assert!(err.contains("schema"));
    }

    #[test]
    fn single_child_gate_prunes_nothing_on_pass() {
        let only = vec!["next".to_string()];
        let routing = run_gate(&GateConfig::default(), &json!({ "DECISION": "PASS" }), &only)
            .unwrap();
        assert_eq!(routing.accepted_target.as_deref(), Some("next"));
        assert!(routing.pruned_target.is_none());
    }
}
