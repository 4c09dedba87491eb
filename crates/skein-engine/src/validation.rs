//! Graph validation lints, run before scheduling.
//!
//! Warnings are advisory and logged; errors fail the run before the first
//! node is queued.

use std::collections::{HashSet, VecDeque};

use skein_types::{NodeType, Result, SkeinError};

use crate::graph::GraphData;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub node_id: Option<String>,
    pub message: String,
}

impl Diagnostic {
    fn error(node_id: Option<&str>, message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Error,
            node_id: node_id.map(String::from),
            message: message.into(),
        }
    }

    fn warning(node_id: Option<&str>, message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            node_id: node_id.map(String::from),
            message: message.into(),
        }
    }
}

/// Collect all diagnostics for a graph.
pub fn validate(graph: &GraphData) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    if graph.nodes.is_empty() {
        diagnostics.push(Diagnostic::error(None, "graph has no nodes"));
        return diagnostics;
    }

    let mut ids = HashSet::new();
    for node in &graph.nodes {
        if !ids.insert(node.id.as_str()) {
            diagnostics.push(Diagnostic::error(
                Some(&node.id),
                format!("duplicate node id '{}'", node.id),
            ));
        }
    }

    for edge in &graph.edges {
        if edge.from.node_id == edge.to.node_id {
            diagnostics.push(Diagnostic::error(
                Some(&edge.from.node_id),
                format!("self-loop edge on '{}'", edge.from.node_id),
            ));
        }
        for endpoint in [&edge.from.node_id, &edge.to.node_id] {
            if !ids.contains(endpoint.as_str()) {
                diagnostics.push(Diagnostic::warning(
                    Some(endpoint),
                    format!("edge references unknown node '{endpoint}'"),
                ));
            }
        }
    }

    let with_parents: HashSet<&str> = graph
        .edges
        .iter()
        .filter(|e| e.from.node_id != e.to.node_id)
        .filter(|e| ids.contains(e.to.node_id.as_str()) && ids.contains(e.from.node_id.as_str()))
        .map(|e| e.to.node_id.as_str())
        .collect();
    let roots: Vec<&str> = graph
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| !with_parents.contains(id))
        .collect();
    if roots.is_empty() {
        diagnostics.push(Diagnostic::error(
            None,
            "graph has no entry node; every node has a parent",
        ));
    }

    for node in &graph.nodes {
        if node.node_type() == NodeType::Gate {
            let children = graph
                .edges
                .iter()
                .filter(|e| e.from.node_id == node.id && ids.contains(e.to.node_id.as_str()))
                .count();
            if children < 2 {
                diagnostics.push(Diagnostic::warning(
                    Some(&node.id),
                    format!("gate '{}' has fewer than two children", node.id),
                ));
            }
        }
    }

    // Reachability from the entry nodes.
    let mut reachable: HashSet<&str> = roots.iter().copied().collect();
    let mut frontier: VecDeque<&str> = roots.into_iter().collect();
    while let Some(current) = frontier.pop_front() {
        for edge in &graph.edges {
            if edge.from.node_id == current
                && ids.contains(edge.to.node_id.as_str())
                && reachable.insert(edge.to.node_id.as_str())
            {
                frontier.push_back(edge.to.node_id.as_str());
            }
        }
    }
    for node in &graph.nodes {
        if !reachable.contains(node.id.as_str()) {
            diagnostics.push(Diagnostic::warning(
                Some(&node.id),
                format!("node '{}' is unreachable from any entry node", node.id),
            ));
        }
    }

    diagnostics
}

/// Log warnings and fail on the first error.
pub fn validate_or_raise(graph: &GraphData) -> Result<()> {
    let diagnostics = validate(graph);
    let mut errors = Vec::new();
    for diagnostic in &diagnostics {
        match diagnostic.severity {
            Severity::Warning => {
                tracing::warn!(node = ?diagnostic.node_id, "{}", diagnostic.message);
            }
            Severity::Error => errors.push(diagnostic.message.clone()),
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(SkeinError::ValidationError(errors.join("; ")))
    }
}
