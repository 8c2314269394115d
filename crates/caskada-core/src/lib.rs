//! Core engine of caskada: branch-scoped memory, the prep/exec/post node
//! lifecycle with retries, and sequential or concurrent flows over a graph
//! of nodes.
pub mod error;
pub mod flow;
pub mod lifecycle;
pub mod memory;
pub mod node;
pub mod retry;
pub mod tree;
pub mod trigger;

pub use async_trait::async_trait;

pub use error::{CaskadaError, CaskadaResult};
pub use flow::{Flow, FlowOptions, ParallelFlow, Schedule};
pub use lifecycle::{run_node, Node};
pub use memory::{deep_merge, GlobalStore, Memory, Store, RESERVED_KEYS};
pub use node::{ActionLink, BaseNode, NodeId, NodeRef};
pub use retry::{with_retry, Attempt, RetryNode, RetryPolicy};
pub use tree::{Branches, ExecutionTree};
pub use trigger::{Action, Trigger, Triggers, DEFAULT_ACTION};
