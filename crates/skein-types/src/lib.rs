//! Shared types for the Skein graph execution engine.
//!
//! This crate provides the foundational data carried across the engine crates:
//! - `SkeinError` — unified error taxonomy
//! - node statuses and write-once terminal states
//! - `EvidenceEnvelope` — the structured audit record attached to node output
//! - `QualityReport` — result of grading the terminal node
//! - `RunRecord` — the append-only aggregate log of one graph run

use std::collections::BTreeMap;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Unified error type for all Skein subsystems.
#[derive(Debug, thiserror::Error)]
pub enum SkeinError {
    #[error("Graph validation failed: {0}")]
    ValidationError(String),

    #[error("Executor failed on node '{node}': {message}")]
    ExecutorError { node: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// A convenience alias for `Result<T, SkeinError>`.
pub type Result<T> = std::result::Result<T, SkeinError>;

// ---------------------------------------------------------------------------
// Node types and statuses
// ---------------------------------------------------------------------------

/// The three node kinds the engine knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Turn,
    Transform,
    Gate,
}

impl NodeType {
    pub fn label(&self) -> &'static str {
        match self {
            NodeType::Turn => "turn",
            NodeType::Transform => "transform",
            NodeType::Gate => "gate",
        }
    }
}

/// Runtime status of a node as it moves through a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRunStatus {
    Idle,
    Queued,
    Running,
    Done,
    LowQuality,
    Failed,
    Skipped,
    Cancelled,
}

/// Write-once terminal state of a node. Recorded exactly once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    Done,
    LowQuality,
    Failed,
    Skipped,
    Cancelled,
}

impl TerminalState {
    /// `true` when the node produced a stored output (`done` or `low_quality`).
    pub fn is_productive(&self) -> bool {
        matches!(self, TerminalState::Done | TerminalState::LowQuality)
    }

    pub fn as_run_status(&self) -> NodeRunStatus {
        match self {
            TerminalState::Done => NodeRunStatus::Done,
            TerminalState::LowQuality => NodeRunStatus::LowQuality,
            TerminalState::Failed => NodeRunStatus::Failed,
            TerminalState::Skipped => NodeRunStatus::Skipped,
            TerminalState::Cancelled => NodeRunStatus::Cancelled,
        }
    }
}

// ---------------------------------------------------------------------------
// Usage accounting
// ---------------------------------------------------------------------------

/// Token usage reported by a turn executor call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl UsageStats {
    pub fn merge(base: Option<UsageStats>, next: Option<UsageStats>) -> Option<UsageStats> {
        match (base, next) {
            (None, None) => None,
            (a, b) => {
                let a = a.unwrap_or_default();
                let b = b.unwrap_or_default();
                Some(UsageStats {
                    input_tokens: a.input_tokens + b.input_tokens,
                    output_tokens: a.output_tokens + b.output_tokens,
                    total_tokens: a.total_tokens + b.total_tokens,
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Evidence
// ---------------------------------------------------------------------------

/// How far the engine could verify a node's output against its own metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Verified,
    NeedsVerification,
    Unparsed,
}

/// Coarse confidence band derived from the 0–1 confidence score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
}

impl ConfidenceBand {
    /// Map a 0–1 confidence score to a band.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.7 {
            ConfidenceBand::High
        } else if score >= 0.4 {
            ConfidenceBand::Medium
        } else {
            ConfidenceBand::Low
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConfidenceBand::High => "high",
            ConfidenceBand::Medium => "medium",
            ConfidenceBand::Low => "low",
        }
    }
}

/// Structured evidence attached to every node output. Never mutated after
/// creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceEnvelope {
    pub node_id: String,
    pub role_label: String,
    pub provider: String,
    pub verification_status: VerificationStatus,
    pub confidence: f64,
    pub confidence_band: ConfidenceBand,
    pub citations: Vec<String>,
    pub claims: Vec<String>,
    pub data_issues: Vec<String>,
    /// Scalar metrics extracted from structured output, keyed by metric name.
    pub metrics: BTreeMap<String, String>,
    pub captured_at: chrono::DateTime<chrono::Utc>,
}

/// Per-node decision summary accumulated over a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResponsibilityMemory {
    pub node_id: String,
    pub role_label: String,
    pub decision_summary: String,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// One value a node reported for a contested metric key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricObservation {
    pub node_id: String,
    pub value: String,
}

/// A metric key reported with divergent values by different nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricConflict {
    pub metric_key: String,
    pub values: Vec<MetricObservation>,
}

// ---------------------------------------------------------------------------
// Quality gate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityProfile {
    General,
    ResearchEvidence,
    DesignPlanning,
    CodeImplementation,
    SynthesisFinal,
}

impl Default for QualityProfile {
    fn default() -> Self {
        QualityProfile::General
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QualityDecision {
    Pass,
    Reject,
}

/// One check contributing to a quality score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityCheck {
    pub id: String,
    pub label: String,
    pub kind: String,
    pub required: bool,
    pub passed: bool,
    pub score_delta: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Result of grading a final turn node's output. Produced only for a turn
/// node with zero outgoing edges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    pub profile: QualityProfile,
    pub threshold: u32,
    pub score: u32,
    pub decision: QualityDecision,
    pub checks: Vec<QualityCheck>,
    pub failures: Vec<String>,
    pub warnings: Vec<String>,
}

/// Per-node quality metric stored on the run record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMetric {
    pub node_id: String,
    pub profile: QualityProfile,
    pub score: u32,
    pub decision: QualityDecision,
    pub threshold: u32,
    pub failed_checks: usize,
    pub warning_count: usize,
}

/// Aggregate quality metrics over all graded nodes of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualitySummary {
    pub avg_score: f64,
    pub pass_rate: f64,
    pub total_nodes: usize,
    pub pass_nodes: usize,
}

impl QualitySummary {
    pub fn from_metrics(metrics: &BTreeMap<String, NodeMetric>) -> Self {
        if metrics.is_empty() {
            return QualitySummary::default();
        }
        let total = metrics.len();
        let pass = metrics
            .values()
            .filter(|m| m.decision == QualityDecision::Pass)
            .count();
        let avg = metrics.values().map(|m| m.score as f64).sum::<f64>() / total as f64;
        QualitySummary {
            avg_score: (avg * 100.0).round() / 100.0,
            pass_rate: ((pass as f64 / total as f64) * 10_000.0).round() / 100.0,
            total_nodes: total,
            pass_nodes: pass,
        }
    }
}

// ---------------------------------------------------------------------------
// Provider / knowledge traces
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderCallStatus {
    Done,
    Failed,
    Cancelled,
}

/// One entry in the provider trace: a single executor call and how it ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderTraceEntry {
    pub node_id: String,
    pub executor: String,
    pub provider: String,
    pub status: ProviderCallStatus,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Which thread/turn a node's executor call ran under.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreadTurnRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
}

/// One retrieval hit surfaced into a turn call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeTraceEntry {
    pub node_id: String,
    pub file_id: String,
    pub file_name: String,
    pub chunk_index: usize,
    pub score: f64,
}

/// One internal-memory injection surfaced into a turn call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryTraceEntry {
    pub node_id: String,
    pub note: String,
}

// ---------------------------------------------------------------------------
// Feed
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedPostStatus {
    Done,
    LowQuality,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedInputKind {
    Question,
    Node,
}

/// Provenance of one input that fed a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedInputSource {
    pub kind: FeedInputKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub agent_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedAttachmentKind {
    Markdown,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedAttachment {
    pub kind: FeedAttachmentKind,
    pub title: String,
    pub content: String,
    pub truncated: bool,
    pub char_count: usize,
}

/// Evidence metadata surfaced on a feed post.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedEvidenceMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_decision: Option<QualityDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_status: Option<VerificationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_band: Option<ConfidenceBand>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_issues: Vec<String>,
}

/// One entry in the run's append-only activity feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedPost {
    pub id: String,
    pub run_id: String,
    pub node_id: String,
    pub node_type: NodeType,
    pub is_final_document: bool,
    pub agent_name: String,
    pub role_label: String,
    pub status: FeedPostStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub summary: String,
    pub input_sources: Vec<FeedInputSource>,
    pub evidence: FeedEvidenceMeta,
    pub attachments: Vec<FeedAttachment>,
}

// ---------------------------------------------------------------------------
// RunRecord — append-only aggregate log of one run
// ---------------------------------------------------------------------------

/// One recorded node state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTransition {
    pub at: chrono::DateTime<chrono::Utc>,
    pub node_id: String,
    pub status: NodeRunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The aggregate, append-only log of a single graph execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub question: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_answer: Option<String>,
    pub transitions: Vec<RunTransition>,
    pub summary_logs: Vec<String>,
    pub node_logs: HashMap<String, Vec<String>>,
    pub thread_turn_map: HashMap<String, ThreadTurnRef>,
    pub provider_trace: Vec<ProviderTraceEntry>,
    pub knowledge_trace: Vec<KnowledgeTraceEntry>,
    pub internal_memory_trace: Vec<MemoryTraceEntry>,
    pub node_metrics: BTreeMap<String, NodeMetric>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_summary: Option<QualitySummary>,
    pub conflict_ledger: Vec<MetricConflict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_confidence: Option<f64>,
    pub evidence_by_node: BTreeMap<String, Vec<EvidenceEnvelope>>,
    pub run_memory: BTreeMap<String, NodeResponsibilityMemory>,
    pub feed_posts: Vec<FeedPost>,
}

impl RunRecord {
    /// Start a fresh record with a random run id.
    pub fn new(question: impl Into<String>) -> Self {
        RunRecord {
            run_id: uuid::Uuid::new_v4().to_string(),
            question: question.into(),
            started_at: chrono::Utc::now(),
            finished_at: None,
            final_answer: None,
            transitions: Vec::new(),
            summary_logs: Vec::new(),
            node_logs: HashMap::new(),
            thread_turn_map: HashMap::new(),
            provider_trace: Vec::new(),
            knowledge_trace: Vec::new(),
            internal_memory_trace: Vec::new(),
            node_metrics: BTreeMap::new(),
            quality_summary: None,
            conflict_ledger: Vec::new(),
            final_confidence: None,
            evidence_by_node: BTreeMap::new(),
            run_memory: BTreeMap::new(),
            feed_posts: Vec::new(),
        }
    }

    /// Append a node transition and its mirror line in the summary log.
    pub fn append_transition(
        &mut self,
        node_id: &str,
        status: NodeRunStatus,
        message: Option<&str>,
    ) {
        self.transitions.push(RunTransition {
            at: chrono::Utc::now(),
            node_id: node_id.to_string(),
            status,
            message: message.map(String::from),
        });
        let status_text = serde_json::to_string(&status)
            .map(|s| s.trim_matches('"').to_string())
            .unwrap_or_default();
        match message {
            Some(msg) => self
                .summary_logs
                .push(format!("[{node_id}] {status_text}: {msg}")),
            None => self.summary_logs.push(format!("[{node_id}] {status_text}")),
        }
    }

    /// Append a free-form log line for one node.
    pub fn add_node_log(&mut self, node_id: &str, message: impl Into<String>) {
        self.node_logs
            .entry(node_id.to_string())
            .or_default()
            .push(message.into());
    }
}
