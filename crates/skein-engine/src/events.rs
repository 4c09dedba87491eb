//! Run event system for observability.
//!
//! Emits [`RunEvent`]s via a [`tokio::sync::broadcast`] channel so external
//! observers (loggers, UI, metrics) can follow execution progress without
//! coupling to the scheduler internals.

use serde::{Deserialize, Serialize};
use skein_types::{NodeRunStatus, QualityDecision};

/// Events emitted while a graph runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        node_count: usize,
    },
    RunCompleted {
        run_id: String,
        final_answer: Option<String>,
        duration_ms: u64,
    },
    RunPaused {
        run_id: String,
        pending_nodes: usize,
    },
    NodeStateChanged {
        node_id: String,
        status: NodeRunStatus,
        message: Option<String>,
    },
    QualityGraded {
        node_id: String,
        score: u32,
        decision: QualityDecision,
    },
    GateDecided {
        node_id: String,
        decision: String,
        accepted_target: Option<String>,
        pruned_target: Option<String>,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<RunEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers. With no active receivers
    /// the event is silently dropped.
    pub fn emit(&self, event: RunEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
