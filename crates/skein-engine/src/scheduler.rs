//! The run scheduler: drains the ready queue, drives each node through the
//! `process_node` state machine, and finalizes the run record.
//!
//! One node is in flight at a time. Children are enqueued through
//! remaining-parent gating: a child joins the queue exactly when its last
//! declared parent reaches a terminal state, so the AND-join check always
//! observes a complete snapshot of parent outputs.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Map, Value};
use skein_types::{
    EvidenceEnvelope, FeedEvidenceMeta, FeedPostStatus, NodeMetric, NodeRunStatus,
    ProviderCallStatus, ProviderTraceEntry, QualityDecision, QualityProfile, QualitySummary,
    Result, RunRecord, TerminalState, ThreadTurnRef, UsageStats,
};

use crate::evidence::{normalize_envelope, EvidenceLedger, EvidenceSink};
use crate::events::{EventEmitter, RunEvent};
use crate::feed::{self, FeedSink};
use crate::gate;
use crate::graph::{
    DependencyIndex, GateConfig, GraphData, Node, NodeConfig, TransformConfig, TurnConfig,
    DEFAULT_QUALITY_THRESHOLD,
};
use crate::quality::{HeuristicGrader, QualityGrader};
use crate::state::{RunControl, RunState};
use crate::text::extract_text;
use crate::transform::run_transform;
use crate::turn::{execute_with_schema_retry, TurnFailure, TurnOutcome, TurnRunner};
use crate::validation;

const ENGINE_PROVIDER: &str = "engine";
const CANCEL_REASON: &str = "cancelled by user";
const PRUNED_REASON: &str = "branch result pruned";

/// How a call to [`Scheduler::run`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunSignal {
    /// The queue drained and the run record was finalized.
    Completed,
    /// A pause request halted the run; call [`RunControl::resume`] and
    /// [`Scheduler::run`] again to continue.
    Paused,
}

/// Drives one graph run to completion.
pub struct Scheduler {
    index: DependencyIndex,
    question: String,
    runner: Arc<dyn TurnRunner>,
    grader: Arc<dyn QualityGrader>,
    evidence_sink: Option<Box<dyn EvidenceSink>>,
    feed_sink: Option<Box<dyn FeedSink>>,
    emitter: EventEmitter,
    control: RunControl,
    state: RunState,
    ledger: EvidenceLedger,
    record: RunRecord,
    started: Option<Instant>,
    finalized: bool,
}

impl Scheduler {
    /// Validate the graph and seed the ready queue with its entry nodes.
    pub fn new(
        graph: &GraphData,
        question: impl Into<String>,
        runner: Arc<dyn TurnRunner>,
    ) -> Result<Self> {
        validation::validate_or_raise(graph)?;
        let index = DependencyIndex::build(graph);
        let state = RunState::new(&index);
        let question = question.into();
        let record = RunRecord::new(question.clone());

        let mut scheduler = Scheduler {
            index,
            question,
            runner,
            grader: Arc::new(HeuristicGrader),
            evidence_sink: None,
            feed_sink: None,
            emitter: EventEmitter::default(),
            control: RunControl::new(),
            state,
            ledger: EvidenceLedger::new(),
            record,
            started: None,
            finalized: false,
        };
        for root in scheduler.index.roots() {
            scheduler.enqueue(&root);
        }
        Ok(scheduler)
    }

    pub fn with_grader(mut self, grader: Arc<dyn QualityGrader>) -> Self {
        self.grader = grader;
        self
    }

    pub fn with_evidence_sink(mut self, sink: Box<dyn EvidenceSink>) -> Self {
        self.evidence_sink = Some(sink);
        self
    }

    pub fn with_feed_sink(mut self, sink: Box<dyn FeedSink>) -> Self {
        self.feed_sink = Some(sink);
        self
    }

    /// Handle for pausing, resuming, or cancelling this run.
    pub fn control(&self) -> RunControl {
        self.control.clone()
    }

    pub fn events(&self) -> &EventEmitter {
        &self.emitter
    }

    pub fn record(&self) -> &RunRecord {
        &self.record
    }

    pub fn ledger(&self) -> &EvidenceLedger {
        &self.ledger
    }

    pub fn output(&self, node_id: &str) -> Option<&Value> {
        self.state.output(node_id)
    }

    pub fn terminal_state(&self, node_id: &str) -> Option<TerminalState> {
        self.state.terminal(node_id)
    }

    /// Drain the queue. Returns [`RunSignal::Paused`] when a pause request
    /// stops the run with work still pending; the scheduler keeps its state
    /// and can be re-run after a resume.
    pub async fn run(&mut self) -> Result<RunSignal> {
        if self.started.is_none() {
            self.started = Some(Instant::now());
            self.emitter.emit(RunEvent::RunStarted {
                run_id: self.record.run_id.clone(),
                node_count: self.index.node_ids().len(),
            });
            tracing::info!(run_id = %self.record.run_id, "run started");
        }

        while let Some(node_id) = self.state.pop_next() {
            let paused = self.process_node(&node_id).await;
            if paused {
                self.emitter.emit(RunEvent::RunPaused {
                    run_id: self.record.run_id.clone(),
                    pending_nodes: self.state.queue_len(),
                });
                tracing::info!(run_id = %self.record.run_id, "run paused");
                return Ok(RunSignal::Paused);
            }
        }

        self.finalize().await;
        Ok(RunSignal::Completed)
    }

    // -----------------------------------------------------------------------
    // processNode state machine
    // -----------------------------------------------------------------------

    /// Decide what happens to one dequeued node. Returns `true` when the run
    /// must halt for a pause.
    async fn process_node(&mut self, node_id: &str) -> bool {
        // 1. Pause: re-queue and halt. The only non-terminal re-entry.
        if self.control.is_paused() {
            self.state.enqueue(node_id);
            self.transition(node_id, NodeRunStatus::Queued, Some("paused"));
            return true;
        }

        let Some(node) = self.index.node(node_id).cloned() else {
            tracing::warn!(node = %node_id, "dequeued unknown node id");
            return false;
        };

        // 2. Cancel: sticky, cascading through schedule_children.
        if self.control.is_cancelled() {
            self.transition(node_id, NodeRunStatus::Cancelled, Some(CANCEL_REASON));
            self.state.record_terminal(node_id, TerminalState::Cancelled);
            let output = json!({ "claims": [CANCEL_REASON] });
            let envelope = self.record_evidence(&node, ENGINE_PROVIDER, &output).await;
            self.post_feed(
                &node,
                FeedPostStatus::Cancelled,
                CANCEL_REASON,
                None,
                meta_from_envelope(&envelope, None, None),
            )
            .await;
            self.schedule_children(node_id);
            return false;
        }

        // 3. Skip set: the node sits on a branch a gate pruned.
        if self.state.is_in_skip_set(node_id) {
            self.transition(node_id, NodeRunStatus::Skipped, Some(PRUNED_REASON));
            self.state.record_terminal(node_id, TerminalState::Skipped);
            let output = json!({ "claims": [PRUNED_REASON] });
            self.record_evidence(&node, ENGINE_PROVIDER, &output).await;
            self.schedule_children(node_id);
            return false;
        }

        // 4. AND-join: every declared parent must have produced output.
        if let Some(missing) = self
            .index
            .parents(node_id)
            .iter()
            .find(|parent| !self.state.has_output(parent))
            .cloned()
        {
            let reason = format!("missing result from node {missing}");
            self.transition(node_id, NodeRunStatus::Skipped, Some(&reason));
            self.state.record_terminal(node_id, TerminalState::Skipped);
            let output = json!({ "claims": [reason.clone()] });
            let envelope = self.record_evidence(&node, ENGINE_PROVIDER, &output).await;
            self.post_feed(
                &node,
                FeedPostStatus::Cancelled,
                &reason,
                None,
                meta_from_envelope(&envelope, None, None),
            )
            .await;
            self.schedule_children(node_id);
            return false;
        }

        // 5. Execute by node type.
        self.transition(node_id, NodeRunStatus::Running, None);
        match node.config.clone() {
            NodeConfig::Turn(config) => self.execute_turn(&node, &config).await,
            NodeConfig::Transform(config) => {
                self.execute_transform(&node, &config).await;
                false
            }
            NodeConfig::Gate(config) => {
                self.execute_gate(&node, &config).await;
                false
            }
        }
    }

    async fn execute_turn(&mut self, node: &Node, config: &TurnConfig) -> bool {
        let is_final = self.index.is_final_turn_node(&node.id);
        let input = self.build_input(&node.id, is_final);
        let started_at = chrono::Utc::now();
        let clock = Instant::now();

        let execution =
            execute_with_schema_retry(self.runner.as_ref(), node, config, &input, is_final).await;
        for warning in &execution.warnings {
            self.record.add_node_log(&node.id, warning.clone());
        }
        let duration_ms = clock.elapsed().as_millis() as u64;

        match execution.outcome {
            TurnOutcome::Interrupted => {
                if self.control.is_paused() {
                    // The in-flight call was stopped by the pause request.
                    self.state.enqueue(&node.id);
                    self.transition(
                        &node.id,
                        NodeRunStatus::Queued,
                        Some("paused during executor call"),
                    );
                    return true;
                }
                // Interruption with no pause request is a failed call. The
                // engine is the failing party, not a provider.
                let failure = TurnFailure {
                    error: "executor interrupted without a pause request".into(),
                    provider: ENGINE_PROVIDER.into(),
                    thread_id: None,
                    turn_id: None,
                    partial_output: None,
                    usage: None,
                };
                self.finish_turn_failure(node, config, failure, started_at, duration_ms)
                    .await;
                false
            }
            TurnOutcome::Failed(failure) => {
                self.finish_turn_failure(node, config, failure, started_at, duration_ms)
                    .await;
                false
            }
            TurnOutcome::Completed(completion) => {
                self.record.thread_turn_map.insert(
                    node.id.clone(),
                    ThreadTurnRef {
                        thread_id: completion.thread_id.clone(),
                        turn_id: completion.turn_id.clone(),
                    },
                );
                self.record
                    .knowledge_trace
                    .extend(completion.knowledge_trace.clone());
                self.record
                    .internal_memory_trace
                    .extend(completion.memory_trace.clone());
                self.record.provider_trace.push(ProviderTraceEntry {
                    node_id: node.id.clone(),
                    executor: config.executor.clone(),
                    provider: completion.provider.clone(),
                    status: ProviderCallStatus::Done,
                    started_at,
                    finished_at: chrono::Utc::now(),
                    summary: None,
                });

                let envelope = self
                    .record_evidence(node, &completion.provider, &completion.output)
                    .await;

                if is_final {
                    self.finish_final_turn(node, config, completion.output, envelope, duration_ms, completion.usage)
                        .await;
                } else {
                    // Intermediate turn nodes skip the quality gate.
                    self.state.store_output(&node.id, completion.output.clone());
                    self.transition(&node.id, NodeRunStatus::Done, None);
                    self.state.record_terminal(&node.id, TerminalState::Done);
                    self.post_feed(
                        node,
                        FeedPostStatus::Done,
                        "",
                        Some(&completion.output),
                        meta_from_envelope(&envelope, Some(duration_ms), completion.usage),
                    )
                    .await;
                    self.schedule_children(&node.id);
                }
                false
            }
        }
    }

    /// Grade the final node's output. A rejection is terminal `low_quality`,
    /// but the output is still stored so the artifact stays inspectable.
    async fn finish_final_turn(
        &mut self,
        node: &Node,
        config: &TurnConfig,
        output: Value,
        envelope: EvidenceEnvelope,
        duration_ms: u64,
        usage: Option<UsageStats>,
    ) {
        let profile = config
            .quality_profile
            .unwrap_or(QualityProfile::SynthesisFinal);
        let threshold = config
            .quality_threshold
            .unwrap_or(DEFAULT_QUALITY_THRESHOLD);
        let text = extract_text(&output);
        let report = self.grader.grade(profile, threshold, &text).await;

        self.record.node_metrics.insert(
            node.id.clone(),
            NodeMetric {
                node_id: node.id.clone(),
                profile: report.profile,
                score: report.score,
                decision: report.decision,
                threshold: report.threshold,
                failed_checks: report.failures.len(),
                warning_count: report.warnings.len(),
            },
        );
        self.emitter.emit(RunEvent::QualityGraded {
            node_id: node.id.clone(),
            score: report.score,
            decision: report.decision,
        });

        self.state.store_output(&node.id, output.clone());
        let mut meta = meta_from_envelope(&envelope, Some(duration_ms), usage);
        meta.quality_score = Some(report.score);
        meta.quality_decision = Some(report.decision);

        if report.decision == QualityDecision::Pass {
            self.transition(&node.id, NodeRunStatus::Done, None);
            self.state.record_terminal(&node.id, TerminalState::Done);
            self.post_feed(node, FeedPostStatus::Done, "", Some(&output), meta)
                .await;
        } else {
            let message = if report.failures.is_empty() {
                format!("quality score {} below threshold {}", report.score, threshold)
            } else {
                format!(
                    "quality score {} below threshold {}: {}",
                    report.score,
                    threshold,
                    report.failures.join("; ")
                )
            };
            self.transition(&node.id, NodeRunStatus::LowQuality, Some(&message));
            self.state.record_terminal(&node.id, TerminalState::LowQuality);
            self.post_feed(node, FeedPostStatus::LowQuality, &message, Some(&output), meta)
                .await;
        }
        self.schedule_children(&node.id);
    }

    /// Record a failed turn so the audit trail attributes the failure to
    /// the provider that produced it.
    async fn finish_turn_failure(
        &mut self,
        node: &Node,
        config: &TurnConfig,
        failure: TurnFailure,
        started_at: chrono::DateTime<chrono::Utc>,
        duration_ms: u64,
    ) {
        if failure.thread_id.is_some() || failure.turn_id.is_some() {
            self.record.thread_turn_map.insert(
                node.id.clone(),
                ThreadTurnRef {
                    thread_id: failure.thread_id.clone(),
                    turn_id: failure.turn_id.clone(),
                },
            );
        }

        let trace_status = if self.control.is_cancelled() {
            ProviderCallStatus::Cancelled
        } else {
            ProviderCallStatus::Failed
        };
        self.record.provider_trace.push(ProviderTraceEntry {
            node_id: node.id.clone(),
            executor: config.executor.clone(),
            provider: failure.provider.clone(),
            status: trace_status,
            started_at,
            finished_at: chrono::Utc::now(),
            summary: Some(failure.error.clone()),
        });

        self.transition(&node.id, NodeRunStatus::Failed, Some(&failure.error));
        self.state.record_terminal(&node.id, TerminalState::Failed);

        let evidence_output = json!({
            "error": failure.error.clone(),
            "partial_output": failure.partial_output.clone(),
        });
        let envelope = self
            .record_evidence(node, &failure.provider, &evidence_output)
            .await;
        self.post_feed(
            node,
            FeedPostStatus::Failed,
            &failure.error,
            failure.partial_output.as_ref(),
            meta_from_envelope(&envelope, Some(duration_ms), failure.usage),
        )
        .await;
        self.schedule_children(&node.id);
    }

    async fn execute_transform(&mut self, node: &Node, config: &TransformConfig) {
        let input = self.build_input(&node.id, false);
        match run_transform(config, &input) {
            Ok(output) => {
                let envelope = self.record_evidence(node, ENGINE_PROVIDER, &output).await;
                self.state.store_output(&node.id, output.clone());
                self.transition(&node.id, NodeRunStatus::Done, None);
                self.state.record_terminal(&node.id, TerminalState::Done);
                self.post_feed(
                    node,
                    FeedPostStatus::Done,
                    "",
                    Some(&output),
                    meta_from_envelope(&envelope, None, None),
                )
                .await;
            }
            Err(error) => {
                self.transition(&node.id, NodeRunStatus::Failed, Some(&error));
                self.state.record_terminal(&node.id, TerminalState::Failed);
                // Evidence keeps the input alongside the error for debugging.
                let evidence_output = json!({ "error": error, "input": input });
                let envelope = self
                    .record_evidence(node, ENGINE_PROVIDER, &evidence_output)
                    .await;
                self.post_feed(
                    node,
                    FeedPostStatus::Failed,
                    &error,
                    None,
                    meta_from_envelope(&envelope, None, None),
                )
                .await;
            }
        }
        self.schedule_children(&node.id);
    }

    async fn execute_gate(&mut self, node: &Node, config: &GateConfig) {
        let input = self.build_input(&node.id, false);
        let children = self.index.children(&node.id).to_vec();
        match gate::run_gate(config, &input, &children) {
            Ok(routing) => {
                if let Some(pruned) = &routing.pruned_target {
                    let protected = routing
                        .accepted_target
                        .as_deref()
                        .map(|accepted| self.index.reachable_from(accepted))
                        .unwrap_or_default();
                    for skipped in self.index.reachable_from(pruned) {
                        if !protected.contains(&skipped) {
                            self.state.add_to_skip_set(&skipped);
                        }
                    }
                }

                self.emitter.emit(RunEvent::GateDecided {
                    node_id: node.id.clone(),
                    decision: routing.decision.label().to_string(),
                    accepted_target: routing.accepted_target.clone(),
                    pruned_target: routing.pruned_target.clone(),
                });

                let message = match &routing.accepted_target {
                    Some(target) => format!("{} routed to {target}", routing.decision.label()),
                    None => format!("{} with no target", routing.decision.label()),
                };
                // Downstream nodes receive the decision object, with the
                // judged input embedded.
                let output = gate::decision_output(&routing, &input);
                let envelope = self.record_evidence(node, ENGINE_PROVIDER, &output).await;
                self.state.store_output(&node.id, output.clone());
                self.transition(&node.id, NodeRunStatus::Done, Some(&message));
                self.state.record_terminal(&node.id, TerminalState::Done);
                self.post_feed(
                    node,
                    FeedPostStatus::Done,
                    &message,
                    Some(&output),
                    meta_from_envelope(&envelope, None, None),
                )
                .await;
            }
            Err(error) => {
                self.transition(&node.id, NodeRunStatus::Failed, Some(&error));
                self.state.record_terminal(&node.id, TerminalState::Failed);
                let evidence_output = json!({ "error": error, "input": input });
                let envelope = self
                    .record_evidence(node, ENGINE_PROVIDER, &evidence_output)
                    .await;
                self.post_feed(
                    node,
                    FeedPostStatus::Failed,
                    &error,
                    None,
                    meta_from_envelope(&envelope, None, None),
                )
                .await;
            }
        }
        self.schedule_children(&node.id);
    }

    // -----------------------------------------------------------------------
    // Plumbing
    // -----------------------------------------------------------------------

    fn build_input(&self, node_id: &str, is_final: bool) -> Value {
        scheduler_input::build_node_input(
            node_id,
            is_final,
            &self.question,
            &self.index,
            &self.state,
            &self.ledger,
        )
    }

    /// Decrement each child's remaining-parent count; a child is enqueued
    /// exactly when its last parent reaches a terminal state.
    fn schedule_children(&mut self, node_id: &str) {
        for child in self.index.children(node_id).to_vec() {
            if self.state.child_ready(&child) {
                self.enqueue(&child);
            }
        }
    }

    fn enqueue(&mut self, node_id: &str) {
        if self.state.enqueue(node_id) {
            self.transition(node_id, NodeRunStatus::Queued, None);
        }
    }

    fn transition(&mut self, node_id: &str, status: NodeRunStatus, message: Option<&str>) {
        tracing::debug!(node = %node_id, ?status, message, "node transition");
        self.record.append_transition(node_id, status, message);
        self.emitter.emit(RunEvent::NodeStateChanged {
            node_id: node_id.to_string(),
            status,
            message: message.map(String::from),
        });
    }

    async fn record_evidence(
        &mut self,
        node: &Node,
        provider: &str,
        output: &Value,
    ) -> EvidenceEnvelope {
        let envelope = normalize_envelope(node, provider, output);
        if let Some(sink) = self.evidence_sink.as_mut() {
            sink.record(&envelope).await;
        }
        self.ledger.record(envelope.clone());
        envelope
    }

    async fn post_feed(
        &mut self,
        node: &Node,
        status: FeedPostStatus,
        message: &str,
        output: Option<&Value>,
        evidence: FeedEvidenceMeta,
    ) {
        let mut sources = Vec::new();
        let parents = self.index.parents(&node.id);
        if parents.is_empty() {
            sources.push(feed::question_source(&self.question));
        } else {
            for parent_id in parents {
                if let Some(parent) = self.index.node(parent_id) {
                    sources.push(feed::node_source(parent, self.state.output(parent_id)));
                }
            }
        }

        let post = feed::build_feed_post(
            &self.record.run_id,
            node,
            self.index.is_final_turn_node(&node.id),
            status,
            message,
            output,
            sources,
            evidence,
        );
        if let Some(sink) = self.feed_sink.as_mut() {
            sink.post(&post).await;
        }
        self.record.feed_posts.push(post);
    }

    /// Close the run record once the queue is empty.
    async fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.finalized = true;

        // A cancelled run may leave nodes that were never enqueued (their
        // parents never went terminal while paused). Sweep them to cancelled
        // so the record is complete.
        if self.control.is_cancelled() {
            for node_id in self.index.node_ids().to_vec() {
                if self.state.terminal(&node_id).is_none() {
                    self.transition(&node_id, NodeRunStatus::Cancelled, Some(CANCEL_REASON));
                    self.state
                        .record_terminal(&node_id, TerminalState::Cancelled);
                }
            }
        }

        self.record.conflict_ledger = self.ledger.conflicts();
        self.record.run_memory = self.ledger.run_memory().clone();
        self.record.evidence_by_node = self.ledger.by_node().clone();
        self.record.final_confidence = self.ledger.final_confidence();
        if !self.record.node_metrics.is_empty() {
            self.record.quality_summary =
                Some(QualitySummary::from_metrics(&self.record.node_metrics));
        }

        self.record.final_answer = self
            .index
            .node_ids()
            .iter()
            .filter(|id| self.index.is_final_turn_node(id))
            .find_map(|id| self.state.output(id))
            .map(extract_text);
        self.record.finished_at = Some(chrono::Utc::now());

        let duration_ms = self
            .started
            .map(|instant| instant.elapsed().as_millis() as u64)
            .unwrap_or(0);
        self.emitter.emit(RunEvent::RunCompleted {
            run_id: self.record.run_id.clone(),
            final_answer: self.record.final_answer.clone(),
            duration_ms,
        });
        tracing::info!(run_id = %self.record.run_id, duration_ms, "run completed");
    }
}

fn meta_from_envelope(
    envelope: &EvidenceEnvelope,
    duration_ms: Option<u64>,
    usage: Option<UsageStats>,
) -> FeedEvidenceMeta {
    FeedEvidenceMeta {
        duration_ms,
        usage,
        quality_score: None,
        quality_decision: None,
        verification_status: Some(envelope.verification_status),
        confidence_band: Some(envelope.confidence_band),
        data_issues: envelope.data_issues.clone(),
    }
}

/// Input resolution, kept in its own module for testability.
pub(crate) mod scheduler_input {
    use super::*;
    use crate::synthesis;

    /// Resolve the input value for a node about to execute.
    ///
    /// Zero parents: the run question. One parent: that parent's output.
    /// Several parents: a map keyed by parent id. A final turn node with at
    /// least one parent that produced output instead receives the synthesis
    /// packet with its rendered text form; without contributing parents it
    /// falls back to the plain resolution.
    pub(crate) fn build_node_input(
        node_id: &str,
        is_final: bool,
        question: &str,
        index: &DependencyIndex,
        state: &RunState,
        ledger: &EvidenceLedger,
    ) -> Value {
        let parents = index.parents(node_id);

        if is_final {
            let contributing: Vec<String> = parents
                .iter()
                .filter(|parent| state.has_output(parent))
                .cloned()
                .collect();
            if !contributing.is_empty() {
                let packet = synthesis::build_packet(question, &contributing, ledger);
                let rendered = synthesis::render_packet(&packet);
                let mut value = Map::new();
                value.insert("text".into(), Value::String(rendered));
                value.insert("packet".into(), synthesis::packet_to_value(&packet));
                return Value::Object(value);
            }
        }

        match parents {
            [] => Value::String(question.to_string()),
            [only] => state.output(only).cloned().unwrap_or(Value::Null),
            many => {
                let mut map = Map::new();
                for parent in many {
                    map.insert(
                        parent.clone(),
                        state.output(parent).cloned().unwrap_or(Value::Null),
                    );
                }
                Value::Object(map)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, TransformMode};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::turn::{TurnCompletion, TurnFailure, TurnRequest};

    /// Test runner that maps node ids to scripted outcomes.
    struct MapRunner {
        outcomes: Mutex<HashMap<String, Vec<TurnOutcome>>>,
    }

    impl MapRunner {
        fn new() -> Self {
            MapRunner {
                outcomes: Mutex::new(HashMap::new()),
            }
        }

        fn completes(self, node_id: &str, output: Value) -> Self {
            self.outcomes
                .lock()
                .unwrap()
                .entry(node_id.into())
                .or_default()
                .push(TurnOutcome::Completed(TurnCompletion {
                    output,
                    provider: "scripted".into(),
                    thread_id: Some(format!("thread-{node_id}")),
                    turn_id: Some(format!("turn-{node_id}")),
                    usage: None,
                    knowledge_trace: vec![],
                    memory_trace: vec![],
                }));
            self
        }

        fn fails(self, node_id: &str, error: &str) -> Self {
            self.outcomes
                .lock()
                .unwrap()
                .entry(node_id.into())
                .or_default()
                .push(TurnOutcome::Failed(TurnFailure {
                    error: error.into(),
                    provider: "scripted".into(),
                    thread_id: Some(format!("thread-{node_id}")),
                    turn_id: Some(format!("turn-{node_id}")),
                    partial_output: None,
                    usage: None,
                }));
            self
        }
    }

    #[async_trait]
    impl TurnRunner for MapRunner {
        async fn run(&self, request: TurnRequest) -> TurnOutcome {
            self.outcomes
                .lock()
                .unwrap()
                .get_mut(&request.node_id)
                .and_then(|queue| {
                    if queue.is_empty() {
                        None
                    } else {
                        Some(queue.remove(0))
                    }
                })
                .unwrap_or_else(|| panic!("no scripted outcome for node {}", request.node_id))
        }
    }

    fn turn(id: &str) -> Node {
        Node {
            id: id.into(),
            name: String::new(),
            config: NodeConfig::Turn(TurnConfig::default()),
        }
    }

    fn long_answer() -> Value {
        json!(format!(
            "conclusion: evidence supports the finding with medium confidence. {}",
            "more supporting detail follows here. ".repeat(4)
        ))
    }

    #[tokio::test]
    async fn linear_chain_completes_in_order() {
        let graph = GraphData {
            nodes: vec![turn("a"), turn("b")],
            edges: vec![Edge::between("a", "b")],
        };
        let runner = MapRunner::new()
            .completes("a", json!("intermediate"))
            .completes("b", long_answer());
        let mut scheduler = Scheduler::new(&graph, "q", Arc::new(runner)).unwrap();

        let signal = scheduler.run().await.unwrap();
        assert_eq!(signal, RunSignal::Completed);
        assert_eq!(scheduler.terminal_state("a"), Some(TerminalState::Done));
        assert_eq!(scheduler.terminal_state("b"), Some(TerminalState::Done));
        assert!(scheduler.record().final_answer.is_some());
        assert!(scheduler.record().finished_at.is_some());
        // Only the final node is graded.
        assert!(scheduler.record().node_metrics.contains_key("b"));
        assert!(!scheduler.record().node_metrics.contains_key("a"));
    }

    #[tokio::test]
    async fn failed_parent_skips_descendants_via_and_join() {
        let graph = GraphData {
            nodes: vec![turn("a"), turn("b"), turn("c")],
            edges: vec![Edge::between("a", "b"), Edge::between("b", "c")],
        };
        let runner = MapRunner::new().fails("a", "provider exploded");
        let mut scheduler = Scheduler::new(&graph, "q", Arc::new(runner)).unwrap();

        scheduler.run().await.unwrap();
        assert_eq!(scheduler.terminal_state("a"), Some(TerminalState::Failed));
        assert_eq!(scheduler.terminal_state("b"), Some(TerminalState::Skipped));
        assert_eq!(scheduler.terminal_state("c"), Some(TerminalState::Skipped));

        // The skip reason names the blocking parent.
        let skip_log = scheduler
            .record()
            .summary_logs
            .iter()
            .find(|line| line.starts_with("[b] skipped"))
            .unwrap();
        assert!(skip_log.contains("missing result from node a"));
    }

    #[tokio::test]
    async fn and_join_waits_for_longer_branch() {
        // a feeds d directly and also through b; d must not be processed
        // before b finishes.
        let graph = GraphData {
            nodes: vec![turn("a"), turn("b"), turn("d")],
            edges: vec![
                Edge::between("a", "b"),
                Edge::between("a", "d"),
                Edge::between("b", "d"),
            ],
        };
        let runner = MapRunner::new()
            .completes("a", json!("a out"))
            .completes("b", json!("b out"))
            .completes("d", long_answer());
        let mut scheduler = Scheduler::new(&graph, "q", Arc::new(runner)).unwrap();

        scheduler.run().await.unwrap();
        assert_eq!(scheduler.terminal_state("d"), Some(TerminalState::Done));
    }

    #[tokio::test]
    async fn multi_parent_input_is_keyed_by_parent_id() {
        let graph = GraphData {
            nodes: vec![
                turn("a"),
                turn("b"),
                Node {
                    id: "join".into(),
                    name: String::new(),
                    config: NodeConfig::Transform(TransformConfig {
                        mode: TransformMode::Pick,
                        pick_path: Some("a".into()),
                        merge_json: None,
                        template: None,
                    }),
                },
            ],
            edges: vec![Edge::between("a", "join"), Edge::between("b", "join")],
        };
        let runner = MapRunner::new()
            .completes("a", json!("from a"))
            .completes("b", json!("from b"));
        let mut scheduler = Scheduler::new(&graph, "q", Arc::new(runner)).unwrap();

        scheduler.run().await.unwrap();
        assert_eq!(scheduler.output("join"), Some(&json!("from a")));
    }

    #[tokio::test]
    async fn cancel_cascades_and_empties_queue() {
        let graph = GraphData {
            nodes: vec![turn("a"), turn("b"), turn("c")],
            edges: vec![Edge::between("a", "b"), Edge::between("b", "c")],
        };
        let runner = MapRunner::new();
        let mut scheduler = Scheduler::new(&graph, "q", Arc::new(runner)).unwrap();
        scheduler.control().request_cancel();

        let signal = scheduler.run().await.unwrap();
        assert_eq!(signal, RunSignal::Completed);
        for id in ["a", "b", "c"] {
            assert_eq!(scheduler.terminal_state(id), Some(TerminalState::Cancelled));
        }
        // Cancellation marker lands in evidence.
        let memory = &scheduler.record().run_memory["a"];
        assert!(memory.decision_summary.contains("cancelled by user"));
    }

    #[tokio::test]
    async fn pause_requeues_and_halts_then_resumes() {
        let graph = GraphData {
            nodes: vec![turn("a"), turn("b")],
            edges: vec![Edge::between("a", "b")],
        };
        let runner = MapRunner::new()
            .completes("a", json!("a out"))
            .completes("b", long_answer());
        let mut scheduler = Scheduler::new(&graph, "q", Arc::new(runner)).unwrap();

        scheduler.control().request_pause();
        let signal = scheduler.run().await.unwrap();
        assert_eq!(signal, RunSignal::Paused);
        assert_eq!(scheduler.terminal_state("a"), None);
        assert!(scheduler.record().finished_at.is_none());

        scheduler.control().resume();
        let signal = scheduler.run().await.unwrap();
        assert_eq!(signal, RunSignal::Completed);
        assert_eq!(scheduler.terminal_state("a"), Some(TerminalState::Done));
        assert_eq!(scheduler.terminal_state("b"), Some(TerminalState::Done));
    }

    #[tokio::test]
    async fn gate_reject_prunes_pass_branch() {
        // Scenario: judge feeds a gate routing to final (pass) or reject
        // (transform) branches.
        let graph = GraphData {
            nodes: vec![
                turn("judge"),
                Node {
                    id: "gate".into(),
                    name: String::new(),
                    config: NodeConfig::Gate(GateConfig::default()),
                },
                turn("final"),
                Node {
                    id: "reject_note".into(),
                    name: String::new(),
                    config: NodeConfig::Transform(TransformConfig {
                        mode: TransformMode::Template,
                        pick_path: None,
                        merge_json: None,
                        template: Some("rejected: {{input}}".into()),
                    }),
                },
            ],
            edges: vec![
                Edge::between("judge", "gate"),
                Edge::between("gate", "final"),
                Edge::between("gate", "reject_note"),
            ],
        };
        let runner = MapRunner::new().completes("judge", json!({ "DECISION": "REJECT" }));
        let mut scheduler = Scheduler::new(&graph, "q", Arc::new(runner)).unwrap();

        scheduler.run().await.unwrap();
        assert_eq!(scheduler.terminal_state("gate"), Some(TerminalState::Done));
        assert_eq!(scheduler.terminal_state("final"), Some(TerminalState::Skipped));
        assert_eq!(
            scheduler.terminal_state("reject_note"),
            Some(TerminalState::Done)
        );
        // The pruned node's skip reason is the branch pruning, not a missing
        // parent: the gate did produce output.
        let skip_log = scheduler
            .record()
            .summary_logs
            .iter()
            .find(|line| line.starts_with("[final] skipped"))
            .unwrap();
        assert!(skip_log.contains("branch result pruned"));
    }

    #[tokio::test]
    async fn gate_stores_its_decision_as_output() {
        let graph = GraphData {
            nodes: vec![
                turn("judge"),
                Node {
                    id: "gate".into(),
                    name: String::new(),
                    config: NodeConfig::Gate(GateConfig::default()),
                },
                turn("pass_branch"),
                turn("reject_branch"),
            ],
            edges: vec![
                Edge::between("judge", "gate"),
                Edge::between("gate", "pass_branch"),
                Edge::between("gate", "reject_branch"),
            ],
        };
        let runner = MapRunner::new()
            .completes("judge", json!({ "DECISION": "REJECT", "reason": "weak" }))
            .completes("reject_branch", long_answer());
        let mut scheduler = Scheduler::new(&graph, "q", Arc::new(runner)).unwrap();

        scheduler.run().await.unwrap();
        let output = scheduler.output("gate").unwrap();
        assert_eq!(output["decision"], "REJECT");
        assert_eq!(output["input"]["reason"], "weak");
        assert!(output.get("fallback").is_none());
        // The surviving branch received the decision object as its input.
        assert_eq!(
            scheduler.terminal_state("reject_branch"),
            Some(TerminalState::Done)
        );
    }

    #[tokio::test]
    async fn failed_turn_is_attributed_to_its_provider() {
        let graph = GraphData {
            nodes: vec![turn("a")],
            edges: vec![],
        };
        let runner = MapRunner::new().fails("a", "rate limited");
        let mut scheduler = Scheduler::new(&graph, "q", Arc::new(runner)).unwrap();

        scheduler.run().await.unwrap();
        assert_eq!(scheduler.terminal_state("a"), Some(TerminalState::Failed));

        let trace = &scheduler.record().provider_trace;
        assert_eq!(trace.len(), 1);
        assert_eq!(trace[0].provider, "scripted");
        assert_eq!(trace[0].status, ProviderCallStatus::Failed);
        assert_eq!(trace[0].summary.as_deref(), Some("rate limited"));

        // Thread/turn ids from the failed call still land in the map, and
        // the evidence names the failing provider.
        assert_eq!(
            scheduler.record().thread_turn_map["a"].thread_id.as_deref(),
            Some("thread-a")
        );
        assert_eq!(scheduler.record().evidence_by_node["a"][0].provider, "scripted");
    }

    #[test]
    fn final_node_without_parents_gets_the_question() {
        let graph = GraphData {
            nodes: vec![turn("final")],
            edges: vec![],
        };
        let runner = MapRunner::new();
        let scheduler = Scheduler::new(&graph, "the question", Arc::new(runner)).unwrap();

        let input = scheduler_input::build_node_input(
            "final",
            true,
            "the question",
            &scheduler.index,
            &scheduler.state,
            &scheduler.ledger,
        );
        assert_eq!(input, json!("the question"));
    }

    #[tokio::test]
    async fn low_quality_final_output_is_still_stored() {
        let graph = GraphData {
            nodes: vec![Node {
                id: "final".into(),
                name: String::new(),
                config: NodeConfig::Turn(TurnConfig {
                    quality_threshold: Some(80),
                    ..TurnConfig::default()
                }),
            }],
            edges: vec![],
        };
        // Short text fails the length and coverage checks, landing below 80.
        let runner = MapRunner::new().completes("final", json!("meh"));
        let mut scheduler = Scheduler::new(&graph, "q", Arc::new(runner)).unwrap();

        scheduler.run().await.unwrap();
        assert_eq!(
            scheduler.terminal_state("final"),
            Some(TerminalState::LowQuality)
        );
        assert_eq!(scheduler.output("final"), Some(&json!("meh")));
        assert_eq!(
            scheduler.record().node_metrics["final"].decision,
            QualityDecision::Reject
        );
        // The final answer remains inspectable.
        assert_eq!(scheduler.record().final_answer.as_deref(), Some("meh"));
    }

    #[tokio::test]
    async fn final_node_receives_synthesis_packet() {
        let graph = GraphData {
            nodes: vec![turn("searchA"), turn("final")],
            edges: vec![Edge::between("searchA", "final")],
        };
        let runner = MapRunner::new()
            .completes(
                "searchA",
                json!({ "claims": ["finding one"], "confidence": 0.9, "citations": ["https://e.com"] }),
            )
            .completes("final", long_answer());
        let mut scheduler = Scheduler::new(&graph, "what is going on?", Arc::new(runner)).unwrap();

        scheduler.run().await.unwrap();
        let packet_input = scheduler_input::build_node_input(
            "final",
            true,
            "what is going on?",
            &scheduler.index,
            &scheduler.state,
            &scheduler.ledger,
        );
        let text = packet_input["text"].as_str().unwrap();
        assert!(text.contains("[QUESTION]\nwhat is going on?"));
        assert!(text.contains("### evidence:searchA"));
    }

    #[tokio::test]
    async fn provider_trace_and_thread_map_are_recorded() {
        let graph = GraphData {
            nodes: vec![turn("a")],
            edges: vec![],
        };
        let runner = MapRunner::new().completes("a", long_answer());
        let mut scheduler = Scheduler::new(&graph, "q", Arc::new(runner)).unwrap();

        scheduler.run().await.unwrap();
        let trace = &scheduler.record().provider_trace;
        assert_eq!(trace.len(), 1);
        assert_eq!(trace[0].status, ProviderCallStatus::Done);
        assert_eq!(
            scheduler.record().thread_turn_map["a"].thread_id.as_deref(),
            Some("thread-a")
        );
    }
}
