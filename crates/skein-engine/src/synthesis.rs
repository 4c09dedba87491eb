//! Final synthesis aggregation.
//!
//! The final turn node does not receive a plain parent-output map. It gets a
//! [`FinalSynthesisPacket`]: the latest evidence envelope per contributing
//! parent, the unresolved metric conflicts among them, and the run memory.
//! The packet renders to a sectioned text form the executor can consume
//! directly.

use serde::Serialize;
use serde_json::Value;
use skein_types::{EvidenceEnvelope, MetricConflict, NodeResponsibilityMemory};

use crate::evidence::EvidenceLedger;

const MAX_CITATIONS: usize = 4;
const MAX_CLAIMS: usize = 8;
const MAX_ISSUES: usize = 6;

/// Input packet for a final turn node.
#[derive(Debug, Clone, Serialize)]
pub struct FinalSynthesisPacket {
    pub question: String,
    pub evidence_packets: Vec<EvidenceEnvelope>,
    pub unresolved_conflicts: Vec<MetricConflict>,
    pub run_memory: Vec<NodeResponsibilityMemory>,
}

/// Assemble the packet from the ledger. `contributing_parents` are the final
/// node's parents that produced an output, in declaration order.
pub fn build_packet(
    question: &str,
    contributing_parents: &[String],
    ledger: &EvidenceLedger,
) -> FinalSynthesisPacket {
    let evidence_packets: Vec<EvidenceEnvelope> = contributing_parents
        .iter()
        .filter_map(|parent| ledger.latest(parent))
        .cloned()
        .collect();

    let contributing: std::collections::HashSet<&str> =
        evidence_packets.iter().map(|e| e.node_id.as_str()).collect();
    let unresolved_conflicts: Vec<MetricConflict> = ledger
        .conflicts()
        .into_iter()
        .filter_map(|conflict| {
            let values: Vec<_> = conflict
                .values
                .into_iter()
                .filter(|obs| contributing.contains(obs.node_id.as_str()))
                .collect();
            let divergent =
                values.len() > 1 && values.iter().any(|obs| obs.value != values[0].value);
            divergent.then_some(MetricConflict {
                metric_key: conflict.metric_key,
                values,
            })
        })
        .collect();

    FinalSynthesisPacket {
        question: question.to_string(),
        evidence_packets,
        unresolved_conflicts,
        run_memory: ledger.run_memory().values().cloned().collect(),
    }
}

/// The packet as a JSON value, for storage as the final node's input.
pub fn packet_to_value(packet: &FinalSynthesisPacket) -> Value {
    serde_json::to_value(packet).unwrap_or(Value::Null)
}

/// Render the packet as sectioned text. Empty sections are omitted.
pub fn render_packet(packet: &FinalSynthesisPacket) -> String {
    let mut sections = Vec::new();

    sections.push(format!("[QUESTION]\n{}", packet.question));

    if !packet.evidence_packets.is_empty() {
        let mut lines = vec!["[EVIDENCE PACKETS]".to_string()];
        for envelope in &packet.evidence_packets {
            lines.push(format!("### evidence:{}", envelope.node_id));
            lines.push(format!("role: {}", envelope.role_label));
            lines.push(format!(
                "confidence: {:.2} ({})",
                envelope.confidence,
                envelope.confidence_band.label()
            ));
            push_list(&mut lines, "citations", &envelope.citations, MAX_CITATIONS);
            push_list(&mut lines, "claims", &envelope.claims, MAX_CLAIMS);
            push_list(&mut lines, "data_issues", &envelope.data_issues, MAX_ISSUES);
        }
        sections.push(lines.join("\n"));
    }

    if !packet.unresolved_conflicts.is_empty() {
        let mut lines = vec!["[UNRESOLVED CONFLICTS]".to_string()];
        for conflict in &packet.unresolved_conflicts {
            let rendered: Vec<String> = conflict
                .values
                .iter()
                .map(|obs| format!("{}:{}", obs.node_id, obs.value))
                .collect();
            lines.push(format!("- {}: {}", conflict.metric_key, rendered.join(", ")));
        }
        sections.push(lines.join("\n"));
    }

    if !packet.run_memory.is_empty() {
        let mut lines = vec!["[RUN MEMORY]".to_string()];
        for memory in &packet.run_memory {
            lines.push(format!(
                "- {} ({}): {}",
                memory.node_id, memory.role_label, memory.decision_summary
            ));
        }
        sections.push(lines.join("\n"));
    }

    sections.join("\n\n")
}

fn push_list(lines: &mut Vec<String>, label: &str, items: &[String], max: usize) {
    if items.is_empty() {
        return;
    }
    lines.push(format!("{label}:"));
    for item in items.iter().take(max) {
        lines.push(format!("- {item}"));
    }
}
