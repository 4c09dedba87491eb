//! Graph data model and the per-run dependency index.
//!
//! A workflow is a directed acyclic graph of heterogeneous nodes. The
//! [`DependencyIndex`] is computed once when a run starts and is read-only for
//! the rest of the run: adjacency, reverse adjacency, indegree counts, and the
//! set of final turn nodes (turn nodes with no outgoing edges).

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use skein_types::{NodeType, QualityProfile};

/// Default quality threshold applied when a turn node does not set one.
pub const DEFAULT_QUALITY_THRESHOLD: u32 = 70;

/// Configuration of a turn node: one executor call per activation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnConfig {
    /// Executor label, e.g. `"codex"` or `"gemini"`.
    #[serde(default)]
    pub executor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub role_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_threshold: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_profile: Option<QualityProfile>,
    /// JSON schema the output must satisfy, as a JSON string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema_json: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
}

/// What a transform node does with its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformMode {
    Pick,
    Merge,
    Template,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    pub mode: TransformMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pick_path: Option<String>,
    /// JSON object merged over the input, as a JSON string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_json: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateConfig {
    /// Dot path to the decision field. Defaults to `"DECISION"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass_node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_node_id: Option<String>,
    /// JSON schema the gate input must satisfy before a decision is read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_json: Option<String>,
}

/// Per-type node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeConfig {
    Turn(TurnConfig),
    Transform(TransformConfig),
    Gate(GateConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    /// Display name for feed posts. Falls back to the id when empty.
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub config: NodeConfig,
}

impl Node {
    pub fn node_type(&self) -> NodeType {
        match self.config {
            NodeConfig::Turn(_) => NodeType::Turn,
            NodeConfig::Transform(_) => NodeType::Transform,
            NodeConfig::Gate(_) => NodeType::Gate,
        }
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    pub fn role_label(&self) -> &str {
        match &self.config {
            NodeConfig::Turn(turn) if !turn.role_label.is_empty() => &turn.role_label,
            NodeConfig::Turn(_) => "agent",
            NodeConfig::Transform(_) => "transform",
            NodeConfig::Gate(_) => "gate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeEndpoint {
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from: EdgeEndpoint,
    pub to: EdgeEndpoint,
}

impl Edge {
    pub fn between(from: impl Into<String>, to: impl Into<String>) -> Self {
        Edge {
            from: EdgeEndpoint {
                node_id: from.into(),
                port: None,
            },
            to: EdgeEndpoint {
                node_id: to.into(),
                port: None,
            },
        }
    }
}

/// A workflow graph as authored: nodes plus directed edges.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphData {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

// ---------------------------------------------------------------------------
// Dependency index
// ---------------------------------------------------------------------------

/// Read-only execution index over one graph, computed at run start.
#[derive(Debug, Clone)]
pub struct DependencyIndex {
    nodes: HashMap<String, Node>,
    order: Vec<String>,
    adjacency: HashMap<String, Vec<String>>,
    incoming: HashMap<String, Vec<String>>,
    indegree: HashMap<String, usize>,
    final_turn_nodes: HashSet<String>,
}

impl DependencyIndex {
    /// Build the index. Edges referencing unknown node ids are dropped with a
    /// warning rather than failing the run.
    pub fn build(graph: &GraphData) -> Self {
        let mut nodes = HashMap::new();
        let mut order = Vec::new();
        let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
        let mut incoming: HashMap<String, Vec<String>> = HashMap::new();
        let mut indegree: HashMap<String, usize> = HashMap::new();

        for node in &graph.nodes {
            if nodes.insert(node.id.clone(), node.clone()).is_none() {
                order.push(node.id.clone());
            }
            adjacency.entry(node.id.clone()).or_default();
            incoming.entry(node.id.clone()).or_default();
            indegree.entry(node.id.clone()).or_insert(0);
        }

        for edge in &graph.edges {
            let from = &edge.from.node_id;
            let to = &edge.to.node_id;
            if !nodes.contains_key(from) || !nodes.contains_key(to) {
                tracing::warn!(from = %from, to = %to, "dropping edge with unknown endpoint");
                continue;
            }
            adjacency.entry(from.clone()).or_default().push(to.clone());
            incoming.entry(to.clone()).or_default().push(from.clone());
            *indegree.entry(to.clone()).or_insert(0) += 1;
        }

        let final_turn_nodes = order
            .iter()
            .filter(|id| {
                adjacency.get(*id).map(Vec::is_empty).unwrap_or(true)
                    && nodes
                        .get(*id)
                        .map(|n| n.node_type() == NodeType::Turn)
                        .unwrap_or(false)
            })
            .cloned()
            .collect();

        DependencyIndex {
            nodes,
            order,
            adjacency,
            incoming,
            indegree,
            final_turn_nodes,
        }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Node ids in authoring order.
    pub fn node_ids(&self) -> &[String] {
        &self.order
    }

    pub fn children(&self, id: &str) -> &[String] {
        self.adjacency.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn parents(&self, id: &str) -> &[String] {
        self.incoming.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn indegree(&self, id: &str) -> usize {
        self.indegree.get(id).copied().unwrap_or(0)
    }

    /// Entry nodes: zero incoming edges, in authoring order.
    pub fn roots(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| self.indegree(id) == 0)
            .cloned()
            .collect()
    }

    /// A final turn node is a turn node with no outgoing edges. Only these
    /// are graded by the quality gate and fed the synthesis packet.
    pub fn is_final_turn_node(&self, id: &str) -> bool {
        self.final_turn_nodes.contains(id)
    }

    /// All nodes reachable from `start`, including `start` itself.
    pub fn reachable_from(&self, start: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut frontier = VecDeque::new();
        if self.nodes.contains_key(start) {
            seen.insert(start.to_string());
            frontier.push_back(start.to_string());
        }
        while let Some(id) = frontier.pop_front() {
            for child in self.children(&id) {
                if seen.insert(child.clone()) {
                    frontier.push_back(child.clone());
                }
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(id: &str) -> Node {
        Node {
            id: id.into(),
            name: String::new(),
            config: NodeConfig::Turn(TurnConfig::default()),
        }
    }

    fn diamond() -> GraphData {
        GraphData {
            nodes: vec![turn("root"), turn("left"), turn("right"), turn("sink")],
            edges: vec![
                Edge::between("root", "left"),
                Edge::between("root", "right"),
                Edge::between("left", "sink"),
                Edge::between("right", "sink"),
            ],
        }
    }

    #[test]
    fn index_computes_degrees() {
        let index = DependencyIndex::build(&diamond());
        assert_eq!(index.indegree("root"), 0);
        assert_eq!(index.indegree("left"), 1);
        assert_eq!(index.indegree("sink"), 2);
        assert_eq!(index.children("root"), &["left", "right"]);
        assert_eq!(index.parents("sink"), &["left", "right"]);
    }

    #[test]
    fn roots_are_zero_indegree_in_order() {
        let mut graph = diamond();
        graph.nodes.push(turn("isolated"));
        let index = DependencyIndex::build(&graph);
        assert_eq!(index.roots(), vec!["root".to_string(), "isolated".to_string()]);
    }

    #[test]
    fn final_turn_node_requires_turn_type_and_no_children() {
        let graph = GraphData {
            nodes: vec![
                turn("a"),
                Node {
                    id: "t".into(),
                    name: String::new(),
                    config: NodeConfig::Transform(TransformConfig {
                        mode: TransformMode::Template,
                        pick_path: None,
                        merge_json: None,
                        template: None,
                    }),
                },
            ],
            edges: vec![],
        };
        let index = DependencyIndex::build(&graph);
        assert!(index.is_final_turn_node("a"));
        assert!(!index.is_final_turn_node("t"));
    }

    #[test]
    fn dangling_edges_are_dropped() {
        let graph = GraphData {
            nodes: vec![turn("a")],
            edges: vec![Edge::between("a", "ghost"), Edge::between("ghost", "a")],
        };
        let index = DependencyIndex::build(&graph);
        assert!(index.children("a").is_empty());
        assert_eq!(index.indegree("a"), 0);
    }

    #[test]
    fn reachable_from_walks_descendants() {
        let index = DependencyIndex::build(&diamond());
        let reach = index.reachable_from("left");
        assert!(reach.contains("left"));
        assert!(reach.contains("sink"));
        assert!(!reach.contains("right"));
        assert!(!reach.contains("root"));
    }

    #[test]
    fn node_config_json_shape() {
        let node = Node {
            id: "gate1".into(),
            name: "Gate".into(),
            config: NodeConfig::Gate(GateConfig {
                decision_path: Some("verdict".into()),
                pass_node_id: None,
                reject_node_id: None,
                schema_json: None,
            }),
        };
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "gate");
        assert_eq!(json["decision_path"], "verdict");
        let back: Node = serde_json::from_value(json).unwrap();
        assert_eq!(back.node_type(), skein_types::NodeType::Gate);
    }
}
