//! Turn node execution: the executor seam, artifact normalization, and the
//! single schema-guided retry.
//!
//! The engine never talks to a model directly. A [`TurnRunner`] collaborator
//! performs the actual call and reports a tagged [`TurnOutcome`]; the engine
//! wraps it with output normalization and, for final or schema-declaring
//! nodes, one retry that feeds the violations back to the runner.

use async_trait::async_trait;
use serde_json::{json, Value};
use skein_types::{KnowledgeTraceEntry, MemoryTraceEntry, UsageStats};

use crate::graph::{Node, TurnConfig};
use crate::schema;
use crate::text::extract_text;

/// One executor invocation as the runner sees it.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub node_id: String,
    pub executor: String,
    pub model: Option<String>,
    pub prompt: String,
    pub role_label: String,
    pub input: Value,
    /// 0 for the first call, 1 for the schema retry.
    pub attempt: usize,
}

/// A completed executor call.
#[derive(Debug, Clone)]
pub struct TurnCompletion {
    pub output: Value,
    pub provider: String,
    pub thread_id: Option<String>,
    pub turn_id: Option<String>,
    pub usage: Option<UsageStats>,
    pub knowledge_trace: Vec<KnowledgeTraceEntry>,
    pub memory_trace: Vec<MemoryTraceEntry>,
}

/// A failed executor call. `partial_output` carries whatever the provider
/// returned before failing, for the audit trail; thread and turn ids are
/// kept when the provider got far enough to allocate them.
#[derive(Debug, Clone)]
pub struct TurnFailure {
    pub error: String,
    pub provider: String,
    pub thread_id: Option<String>,
    pub turn_id: Option<String>,
    pub partial_output: Option<Value>,
    pub usage: Option<UsageStats>,
}

/// Tagged result of one executor call. `Interrupted` means the call was
/// stopped by an engine-level signal, not that the provider failed.
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    Completed(TurnCompletion),
    Failed(TurnFailure),
    Interrupted,
}

/// Collaborator that performs the actual model call for a turn node.
#[async_trait]
pub trait TurnRunner: Send + Sync {
    async fn run(&self, request: TurnRequest) -> TurnOutcome;
}

/// Result of [`execute_with_schema_retry`]: the final outcome plus any
/// schema warnings that survived the retry.
#[derive(Debug)]
pub struct TurnExecution {
    pub outcome: TurnOutcome,
    pub warnings: Vec<String>,
    pub attempts: usize,
}

/// Run a turn node's executor, retrying once on schema violations when the
/// node is a final turn node or declares an output schema. Failures and
/// interruptions are returned as-is; the retry exists only to repair
/// structurally invalid output.
pub async fn execute_with_schema_retry(
    runner: &dyn TurnRunner,
    node: &Node,
    config: &TurnConfig,
    input: &Value,
    is_final: bool,
) -> TurnExecution {
    let max_retry = if is_final || config.output_schema_json.is_some() {
        1
    } else {
        0
    };

    let parsed_schema = parse_output_schema(config);
    let mut warnings = Vec::new();
    let mut request_input = input.clone();
    let mut merged_usage: Option<UsageStats> = None;
    let mut attempt = 0;

    loop {
        let request = TurnRequest {
            node_id: node.id.clone(),
            executor: config.executor.clone(),
            model: config.model.clone(),
            prompt: config.prompt.clone(),
            role_label: node.role_label().to_string(),
            input: request_input.clone(),
            attempt,
        };
        tracing::debug!(node = %node.id, attempt, "dispatching turn executor");

        match runner.run(request).await {
            TurnOutcome::Interrupted => {
                return TurnExecution {
                    outcome: TurnOutcome::Interrupted,
                    warnings,
                    attempts: attempt + 1,
                };
            }
            TurnOutcome::Failed(mut failure) => {
                failure.usage = UsageStats::merge(merged_usage, failure.usage);
                return TurnExecution {
                    outcome: TurnOutcome::Failed(failure),
                    warnings,
                    attempts: attempt + 1,
                };
            }
            TurnOutcome::Completed(mut completion) => {
                completion.output = normalize_artifact_output(completion.output, node, config);
                completion.usage = UsageStats::merge(merged_usage, completion.usage);

                let violations = match &parsed_schema {
                    Some(schema_value) => {
                        let target = schema_validation_target(&completion.output);
                        schema::validate(target, schema_value)
                    }
                    None => Vec::new(),
                };

                if violations.is_empty() || attempt >= max_retry {
                    if !violations.is_empty() {
                        warnings.push(format!(
                            "output schema violations persisted after retry: {}",
                            violations
                                .iter()
                                .map(|v| v.to_string())
                                .collect::<Vec<_>>()
                                .join("; ")
                        ));
                    }
                    return TurnExecution {
                        outcome: TurnOutcome::Completed(completion),
                        warnings,
                        attempts: attempt + 1,
                    };
                }

                tracing::info!(
                    node = %node.id,
                    violations = violations.len(),
                    "turn output violated schema, retrying once"
                );
                request_input =
                    build_schema_retry_input(input, &completion.output, &violations);
                merged_usage = completion.usage;
                attempt += 1;
            }
        }
    }
}

fn parse_output_schema(config: &TurnConfig) -> Option<Value> {
    let raw = config.output_schema_json.as_deref()?;
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(%err, "ignoring unparseable output schema");
            None
        }
    }
}

/// Wrap raw executor output into an artifact envelope when the node declares
/// an artifact type. String output that parses as JSON becomes the payload;
/// otherwise the raw value is the payload.
pub fn normalize_artifact_output(raw: Value, node: &Node, config: &TurnConfig) -> Value {
    let Some(artifact_type) = config.artifact_type.as_deref() else {
        return raw;
    };

    let payload = match &raw {
        Value::String(text) => serde_json::from_str::<Value>(text)
            .ok()
            .filter(|v| v.is_object() || v.is_array())
            .unwrap_or_else(|| raw.clone()),
        other => other.clone(),
    };

    json!({
        "artifact": {
            "artifact_type": artifact_type,
            "version": "v1",
            "author_node_id": node.id,
            "created_at": chrono::Utc::now().to_rfc3339(),
            "payload": payload,
        },
        "text": extract_text(&raw),
        "raw": raw,
    })
}

/// Schemas apply to the artifact payload when the output is an envelope,
/// otherwise to the output itself.
pub fn schema_validation_target(output: &Value) -> &Value {
    output
        .get("artifact")
        .and_then(|artifact| artifact.get("payload"))
        .unwrap_or(output)
}

fn build_schema_retry_input(
    original_input: &Value,
    previous_output: &Value,
    violations: &[schema::Violation],
) -> Value {
    json!({
        "input": original_input,
        "previous_output": previous_output,
        "schema_violations": violations
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>(),
        "instruction": "The previous output did not satisfy the required output schema. \
                        Fix the listed violations and answer again with the same content.",
    })
}
