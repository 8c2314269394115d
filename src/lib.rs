//! # Caskada - an in-process async graph execution engine
//!
//! Nodes run a prep/exec/post lifecycle, trigger named actions, and hand a
//! forked memory to their successors. A [`Flow`] walks the graph one branch
//! at a time; a [`ParallelFlow`] runs sibling branches concurrently.
//!
//! ```rust
//! use caskada::prelude::*;
//!
//! #[derive(Clone)]
//! struct Greet;
//!
//! #[async_trait]
//! impl Node for Greet {
//!     type PrepResult = ();
//!     type ExecResult = ();
//!
//!     async fn post(
//!         &mut self,
//!         memory: &mut Memory,
//!         _prep: (),
//!         _exec: (),
//!         _triggers: &Triggers,
//!     ) -> CaskadaResult<()> {
//!         memory.set("greeting", "hello")
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let start = NodeRef::new(Greet);
//! let memory = Memory::default();
//! Flow::new(&start).run(memory.clone()).await.unwrap();
//! assert_eq!(memory.get("greeting"), Some("hello".into()));
//! # }
//! ```

use tracing_subscriber::EnvFilter;

/// Initialize the framework with default settings.
///
/// Installs a `tracing` subscriber honouring `RUST_LOG` (default `info`).
/// Calling it more than once is harmless.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

// Re-export the core module
pub use caskada_core as core;

pub use caskada_core::{
    run_node, with_retry, CaskadaError, CaskadaResult, ExecutionTree, Flow, FlowOptions, Memory,
    Node, NodeRef, ParallelFlow, RetryPolicy, Triggers,
};

/// Everything needed to write nodes and wire flows.
pub mod prelude {
    pub use caskada_core::{
        async_trait, run_node, with_retry, Action, Attempt, CaskadaError, CaskadaResult,
        ExecutionTree, Flow, FlowOptions, Memory, Node, NodeRef, ParallelFlow, RetryNode,
        RetryPolicy, Store, Triggers, DEFAULT_ACTION,
    };
}
