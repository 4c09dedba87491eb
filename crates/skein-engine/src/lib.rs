//! Graph execution engine for multi-agent workflows.
//!
//! A workflow is a DAG of heterogeneous nodes: `turn` nodes delegate to an
//! external executor via the [`turn::TurnRunner`] seam, `transform` nodes
//! reshape data synchronously, `gate` nodes route on a PASS/REJECT decision
//! and prune the losing branch. The [`scheduler::Scheduler`] drains a ready
//! queue under AND-join dependency gating, honors cooperative pause/cancel
//! requests, grades the terminal node's output, and accumulates an
//! append-only audit trail (evidence envelopes + feed posts) on the
//! [`skein_types::RunRecord`].
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use skein_engine::graph::{Edge, GraphData, Node, NodeConfig, TurnConfig};
//! # use skein_engine::scheduler::Scheduler;
//! # use skein_engine::turn::TurnRunner;
//! # async fn example(runner: Arc<dyn TurnRunner>) -> skein_types::Result<()> {
//! let graph = GraphData {
//!     nodes: vec![Node {
//!         id: "answer".into(),
//!         name: String::new(),
//!         config: NodeConfig::Turn(TurnConfig::default()),
//!     }],
//!     edges: vec![],
//! };
//! let mut scheduler = Scheduler::new(&graph, "what changed?", runner)?;
//! scheduler.run().await?;
//! println!("{:?}", scheduler.record().final_answer);
//! # Ok(())
//! # }
//! ```

pub mod evidence;
pub mod events;
pub mod feed;
pub mod gate;
pub mod graph;
pub mod quality;
pub mod schema;
pub mod scheduler;
pub mod state;
pub mod synthesis;
pub mod text;
pub mod transform;
pub mod turn;
pub mod validation;

pub use scheduler::{RunSignal, Scheduler};
pub use state::RunControl;
pub use turn::{TurnOutcome, TurnRunner};

pub use skein_types::{Result, SkeinError};
