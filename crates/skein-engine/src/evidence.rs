//! Evidence ledger: normalization of node output into audit envelopes,
//! per-node run memory, and the metric conflict ledger.
//!
//! Envelopes are append-only. The ledger is engine-owned; an optional
//! [`EvidenceSink`] receives a copy of every recorded envelope so external
//! stores can mirror the trail without the engine depending on them.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use skein_types::{
    ConfidenceBand, EvidenceEnvelope, MetricConflict, MetricObservation,
    NodeResponsibilityMemory, VerificationStatus,
};

use crate::graph::Node;
use crate::text::extract_text;

const MAX_SUMMARY_CHARS: usize = 160;

/// Receives a copy of every envelope the engine records.
#[async_trait]
pub trait EvidenceSink: Send + Sync {
    async fn record(&mut self, envelope: &EvidenceEnvelope);
}

/// Build an envelope from a node's output. Structured fields (`citations`,
/// `claims`, `data_issues`, `confidence`, `metrics`) are read from the
/// artifact payload when present; unstructured text degrades gracefully.
pub fn normalize_envelope(node: &Node, provider: &str, output: &Value) -> EvidenceEnvelope {
    let payload = output
        .get("artifact")
        .and_then(|artifact| artifact.get("payload"))
        .unwrap_or(output);
    let text = extract_text(output);

    let mut citations = string_list(payload.get("citations"));
    if citations.is_empty() {
        citations = extract_urls(&text);
    }
    let claims = string_list(payload.get("claims"));
    let data_issues = string_list(payload.get("data_issues").or_else(|| payload.get("issues")));

    let explicit_confidence = payload.get("confidence").and_then(Value::as_f64);
    let confidence = match explicit_confidence {
        Some(value) => value.clamp(0.0, 1.0),
        None if !citations.is_empty() => 0.6,
        None => 0.4,
    };

    let verification_status = if !payload.is_object() {
        VerificationStatus::Unparsed
    } else if explicit_confidence.is_some() && !citations.is_empty() {
        VerificationStatus::Verified
    } else {
        VerificationStatus::NeedsVerification
    };

    let metrics = payload
        .get("metrics")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .map(|(key, value)| (key.clone(), scalar_text(value)))
                .collect()
        })
        .unwrap_or_default();

    EvidenceEnvelope {
        node_id: node.id.clone(),
        role_label: node.role_label().to_string(),
        provider: provider.to_string(),
        verification_status,
        confidence,
        confidence_band: ConfidenceBand::from_score(confidence),
        citations,
        claims,
        data_issues,
        metrics,
        captured_at: chrono::Utc::now(),
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Object(map) => map
                        .get("text")
                        .and_then(Value::as_str)
                        .map(String::from),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn extract_urls(text: &str) -> Vec<String> {
    regex::Regex::new(r"https?://[^\s)\]\x22]+")
        .map(|re| {
            re.find_iter(text)
                .map(|hit| hit.as_str().to_string())
                .collect()
        })
        .unwrap_or_default()
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Append-only evidence store for one run, with run memory and conflict
/// detection over the recorded envelopes.
#[derive(Debug, Default)]
pub struct EvidenceLedger {
    by_node: BTreeMap<String, Vec<EvidenceEnvelope>>,
    run_memory: BTreeMap<String, NodeResponsibilityMemory>,
}

impl EvidenceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an envelope and refresh the node's run-memory summary.
    pub fn record(&mut self, envelope: EvidenceEnvelope) {
        let summary = envelope
            .claims
            .first()
            .cloned()
            .unwrap_or_else(|| format!("produced {} output", envelope.role_label));
        let summary: String = summary.chars().take(MAX_SUMMARY_CHARS).collect();
        self.run_memory.insert(
            envelope.node_id.clone(),
            NodeResponsibilityMemory {
                node_id: envelope.node_id.clone(),
                role_label: envelope.role_label.clone(),
                decision_summary: summary,
                updated_at: envelope.captured_at,
            },
        );
        self.by_node
            .entry(envelope.node_id.clone())
            .or_default()
            .push(envelope);
    }

    pub fn latest(&self, node_id: &str) -> Option<&EvidenceEnvelope> {
        self.by_node.get(node_id).and_then(|entries| entries.last())
    }

    pub fn by_node(&self) -> &BTreeMap<String, Vec<EvidenceEnvelope>> {
        &self.by_node
    }

    pub fn run_memory(&self) -> &BTreeMap<String, NodeResponsibilityMemory> {
        &self.run_memory
    }

    /// Metric keys reported with divergent values by more than one node,
    /// judged over each node's latest envelope.
    pub fn conflicts(&self) -> Vec<MetricConflict> {
        let mut observed: BTreeMap<String, Vec<MetricObservation>> = BTreeMap::new();
        for (node_id, entries) in &self.by_node {
            let Some(latest) = entries.last() else { continue };
            for (key, value) in &latest.metrics {
                observed.entry(key.clone()).or_default().push(MetricObservation {
                    node_id: node_id.clone(),
                    value: value.clone(),
                });
            }
        }
        observed
            .into_iter()
            .filter(|(_, values)| {
                values.len() > 1 && values.iter().any(|obs| obs.value != values[0].value)
            })
            .map(|(metric_key, values)| MetricConflict { metric_key, values })
            .collect()
    }

    /// Mean confidence of each node's latest envelope, docked for each open
    /// conflict, clamped to 0..1.
    pub fn final_confidence(&self) -> Option<f64> {
        if self.by_node.is_empty() {
            return None;
        }
        let latest: Vec<f64> = self
            .by_node
            .values()
            .filter_map(|entries| entries.last())
            .map(|envelope| envelope.confidence)
            .collect();
        let mean = latest.iter().sum::<f64>() / latest.len() as f64;
        let docked = mean - 0.1 * self.conflicts().len() as f64;
        Some((docked.clamp(0.0, 1.0) * 100.0).round() / 100.0)
    }
}
