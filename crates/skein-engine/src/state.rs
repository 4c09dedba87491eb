//! Mutable per-run state and the cooperative pause/cancel flags.
//!
//! [`RunState`] is owned by the scheduler and mutated only through its
//! accessors. [`RunControl`] is the cheap, cloneable handle external callers
//! use to pause, resume, or cancel a running graph.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use skein_types::TerminalState;

use crate::graph::DependencyIndex;

/// Shared pause/cancel flags. Cancel is sticky for the life of the run;
/// pause is momentary and cleared by [`RunControl::resume`].
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    pause: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.pause.store(false, Ordering::SeqCst);
    }

    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

/// Per-run mutable state: outputs, write-once terminal states, the skip set,
/// the FIFO work queue, and the remaining-parent counts that gate child
/// activation.
#[derive(Debug)]
pub struct RunState {
    outputs: HashMap<String, Value>,
    terminal: HashMap<String, TerminalState>,
    skip_set: HashSet<String>,
    queue: VecDeque<String>,
    queued: HashSet<String>,
    remaining_parents: HashMap<String, usize>,
}

impl RunState {
    /// Seed state from the dependency index: every node starts with its
    /// indegree as its remaining-parent count.
    pub fn new(index: &DependencyIndex) -> Self {
        let remaining_parents = index
            .node_ids()
            .iter()
            .map(|id| (id.clone(), index.indegree(id)))
            .collect();
        RunState {
            outputs: HashMap::new(),
            terminal: HashMap::new(),
            skip_set: HashSet::new(),
            queue: VecDeque::new(),
            queued: HashSet::new(),
            remaining_parents,
        }
    }

    /// Enqueue a node unless it is already waiting in the queue or has
    /// reached a terminal state. Returns whether it was added.
    pub fn enqueue(&mut self, node_id: &str) -> bool {
        if self.queued.contains(node_id) || self.terminal.contains_key(node_id) {
            return false;
        }
        self.queued.insert(node_id.to_string());
        self.queue.push_back(node_id.to_string());
        true
    }

    pub fn pop_next(&mut self) -> Option<String> {
        let next = self.queue.pop_front()?;
        self.queued.remove(&next);
        Some(next)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Record the terminal state of a node. The first write wins; later
    /// writes are ignored and reported as `false`.
    pub fn record_terminal(&mut self, node_id: &str, state: TerminalState) -> bool {
        if self.terminal.contains_key(node_id) {
            tracing::warn!(node = %node_id, ?state, "ignoring second terminal state");
            return false;
        }
        self.terminal.insert(node_id.to_string(), state);
        true
    }

    pub fn terminal(&self, node_id: &str) -> Option<TerminalState> {
        self.terminal.get(node_id).copied()
    }

    pub fn store_output(&mut self, node_id: &str, output: Value) {
        self.outputs.insert(node_id.to_string(), output);
    }

    pub fn output(&self, node_id: &str) -> Option<&Value> {
        self.outputs.get(node_id)
    }

    pub fn has_output(&self, node_id: &str) -> bool {
        self.outputs.contains_key(node_id)
    }

    pub fn add_to_skip_set(&mut self, node_id: &str) {
        self.skip_set.insert(node_id.to_string());
    }

    pub fn is_in_skip_set(&self, node_id: &str) -> bool {
        self.skip_set.contains(node_id)
    }

    /// Decrement a child's remaining-parent count after one of its parents
    /// reached a terminal state. Returns `true` exactly when the count hits
    /// zero, i.e. the child is ready to be enqueued.
    pub fn child_ready(&mut self, child_id: &str) -> bool {
        match self.remaining_parents.get_mut(child_id) {
            Some(count) if *count > 0 => {
                *count -= 1;
                *count == 0
            }
            _ => false,
        }
    }
}
