//! Transform node execution: pure, synchronous reshaping of an input value.
//!
//! Three modes: `pick` extracts a value by dot path, `merge` overlays a
//! configured JSON object, `template` substitutes the input into a text
//! template. Failures are returned as messages and become the node's `failed`
//! terminal state; they never abort the run.

use serde_json::{json, Value};

use crate::graph::{TransformConfig, TransformMode};
use crate::text::{get_by_path, stringify};

/// Apply a transform node's config to its input.
pub fn run_transform(config: &TransformConfig, input: &Value) -> Result<Value, String> {
    match config.mode {
        TransformMode::Pick => run_pick(config, input),
        TransformMode::Merge => run_merge(config, input),
        TransformMode::Template => run_template(config, input),
    }
}

fn run_pick(config: &TransformConfig, input: &Value) -> Result<Value, String> {
    let path = config
        .pick_path
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| "pick transform has no pick_path configured".to_string())?;
    // An absent path is a failure, not a silent null.
    get_by_path(input, path)
        .cloned()
        .ok_or_else(|| format!("pick path '{path}' not found in input"))
}

fn run_merge(config: &TransformConfig, input: &Value) -> Result<Value, String> {
    let raw = config
        .merge_json
        .as_deref()
        .ok_or_else(|| "merge transform has no merge_json configured".to_string())?;
    let overlay: Value = serde_json::from_str(raw)
        .map_err(|err| format!("merge_json is not valid JSON: {err}"))?;

    match (input, &overlay) {
        (Value::Object(base), Value::Object(extra)) => {
            let mut merged = base.clone();
            for (key, value) in extra {
                merged.insert(key.clone(), value.clone());
            }
            Ok(Value::Object(merged))
        }
        _ => Ok(json!({ "input": input, "merge": overlay })),
    }
}

fn run_template(config: &TransformConfig, input: &Value) -> Result<Value, String> {
    let template = config
        .template
        .as_deref()
        .ok_or_else(|| "template transform has no template configured".to_string())?;
    let rendered = template.replace("{{input}}", &stringify(input));
    Ok(json!({ "text": rendered }))
}
