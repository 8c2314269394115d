use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::future::{join_all, BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use crate::error::{CaskadaError, CaskadaResult};
use crate::memory::Memory;
use crate::node::{BaseNode, NodeId, NodeRef};
use crate::tree::{Branches, ExecutionTree};
use crate::trigger::{Trigger, Triggers};

/// Construction-time options of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowOptions {
    /// Maximum number of visits of a single node within one run.
    pub max_visits: usize,
}

impl Default for FlowOptions {
    fn default() -> Self {
        Self { max_visits: 15 }
    }
}

impl FlowOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-node visit budget.
    pub fn with_max_visits(mut self, max_visits: usize) -> Self {
        self.max_visits = max_visits;
        self
    }
}

/// How sibling branches of a flow are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Schedule {
    /// Each branch completes, subtree included, before the next starts.
    #[default]
    Sequential,
    /// All branches are polled concurrently; results keep task order.
    Concurrent,
}

impl Schedule {
    /// Run the tasks and collect their results in task order.
    ///
    /// Under `Concurrent` every task runs to completion before the first
    /// error (in task order) is returned.
    async fn run_tasks<'a, T: Send + 'a>(
        self,
        tasks: Vec<BoxFuture<'a, CaskadaResult<T>>>,
    ) -> CaskadaResult<Vec<T>> {
        match self {
            Schedule::Sequential => {
                let mut results = Vec::with_capacity(tasks.len());
                for task in tasks {
                    results.push(task.await?);
                }
                Ok(results)
            }
            Schedule::Concurrent => join_all(tasks).await.into_iter().collect(),
        }
    }
}

/// Bookkeeping of one flow run; never shared between runs.
#[derive(Default)]
struct RunState {
    visits: Mutex<HashMap<NodeId, usize>>,
    forwarded: Mutex<Vec<Trigger>>,
}

impl RunState {
    fn visit(&self, id: NodeId) -> usize {
        let mut visits = lock(&self.visits);
        let count = visits.entry(id).or_insert(0);
        *count += 1;
        *count
    }

    fn forward(&self, trigger: Trigger) {
        lock(&self.forwarded).push(trigger);
    }

    fn into_forwarded(self) -> Vec<Trigger> {
        self.forwarded.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Orchestrates a graph of nodes from a start node, one branch at a time.
///
/// A flow is itself a node: register it with [`Flow::into_node`] to nest it
/// in a larger graph. Explicit triggers that reach the edge of the nested
/// graph become triggers of the flow node.
#[derive(Clone)]
pub struct Flow {
    start: NodeRef,
    options: FlowOptions,
    schedule: Schedule,
}

impl Flow {
    pub fn new(start: &NodeRef) -> Self {
        Self::with_options(start, FlowOptions::default())
    }

    pub fn with_options(start: &NodeRef, options: FlowOptions) -> Self {
        Self {
            start: start.clone(),
            options,
            schedule: Schedule::Sequential,
        }
    }

    pub fn start(&self) -> &NodeRef {
        &self.start
    }

    pub fn options(&self) -> &FlowOptions {
        &self.options
    }

    pub fn schedule(&self) -> Schedule {
        self.schedule
    }

    /// Register the flow as a node of another graph.
    pub fn into_node(self) -> NodeRef {
        NodeRef::from_base(Box::new(self))
    }

    /// Run the graph from the start node and return its execution tree.
    ///
    /// Side effects are visible through the global store of `memory`.
    pub async fn run(&self, memory: impl Into<Memory>) -> CaskadaResult<ExecutionTree> {
        let memory = memory.into();
        let (tree, _) = self.exec_runner(&memory).await?;
        Ok(tree)
    }

    async fn exec_runner(&self, memory: &Memory) -> CaskadaResult<(ExecutionTree, Vec<Trigger>)> {
        let run_id = Uuid::new_v4();
        let span = info_span!("flow", %run_id, kind = self.type_name(), start = %self.start.label());
        async {
            info!(max_visits = self.options.max_visits, "Starting flow execution");
            let state = RunState::default();
            let tree = self
                .run_node(self.start.clone(), memory.clone(), &state)
                .await?;
            info!(visits = tree.visit_count(), "Flow execution completed");
            Ok::<_, CaskadaError>((tree, state.into_forwarded()))
        }
        .instrument(span)
        .await
    }

    fn run_node<'a>(
        &'a self,
        node: NodeRef,
        memory: Memory,
        state: &'a RunState,
    ) -> BoxFuture<'a, CaskadaResult<ExecutionTree>> {
        async move {
            let visits = state.visit(node.id());
            if visits > self.options.max_visits {
                error!(
                    node = %node.label(),
                    limit = self.options.max_visits,
                    "Cycle limit exceeded"
                );
                return Err(CaskadaError::CycleLimitExceeded {
                    node: node.label(),
                    limit: self.options.max_visits,
                });
            }

            debug!(node = %node.label(), visit = visits, "Executing node");
            let propagation = node.run_propagate(memory).await?;

            let mut triggered = Branches::new();
            let mut tasks = Vec::new();
            for (action, branch) in propagation.branches {
                let next_nodes = node.get_next_nodes(&action);
                if next_nodes.is_empty() {
                    // An explicit trigger leaving the graph becomes a trigger of this flow.
                    if propagation.explicit {
                        state.forward(Trigger::new(action.clone(), branch.local().clone()));
                    }
                    triggered.entry(action);
                    continue;
                }
                debug!(node = %node.label(), %action, successors = next_nodes.len(), "Following action");
                // Reserve the slot so the tree keeps trigger order.
                triggered.entry(action.clone());
                tasks.push(
                    async move {
                        let children = self.run_nodes(next_nodes, branch, state).await?;
                        Ok::<_, CaskadaError>((action, children))
                    }
                    .boxed(),
                );
            }

            for (action, children) in self.schedule.run_tasks(tasks).await? {
                triggered.entry(action).extend(children);
            }

            Ok(ExecutionTree {
                order: node.id(),
                node_type: node.type_name().to_string(),
                triggered: (!triggered.is_empty()).then_some(triggered),
            })
        }
        .boxed()
    }

    fn run_nodes<'a>(
        &'a self,
        nodes: Vec<NodeRef>,
        memory: Memory,
        state: &'a RunState,
    ) -> BoxFuture<'a, CaskadaResult<Vec<ExecutionTree>>> {
        let tasks = nodes
            .into_iter()
            .map(|node| self.run_node(node, memory.clone(), state))
            .collect();
        self.schedule.run_tasks(tasks).boxed()
    }
}

#[async_trait]
impl BaseNode for Flow {
    fn clone_box(&self) -> Box<dyn BaseNode> {
        Box::new(self.clone())
    }

    fn type_name(&self) -> &'static str {
        match self.schedule {
            Schedule::Sequential => "Flow",
            Schedule::Concurrent => "ParallelFlow",
        }
    }

    // There is no exec phase to call: the nested graph runs here and post
    // passes its result through without touching the parent's tree.
    async fn run_lifecycle(&mut self, memory: &mut Memory, triggers: &Triggers) -> CaskadaResult<()> {
        let (_tree, forwarded) = self.exec_runner(memory).await?;
        for trigger in forwarded {
            triggers.forward(trigger);
        }
        Ok(())
    }
}

/// A [`Flow`] whose sibling branches run concurrently.
///
/// Concurrent branches share the global store; writes to the same key race
/// with last-write-wins semantics.
#[derive(Clone)]
pub struct ParallelFlow(Flow);

impl ParallelFlow {
    pub fn new(start: &NodeRef) -> Self {
        Self::with_options(start, FlowOptions::default())
    }

    pub fn with_options(start: &NodeRef, options: FlowOptions) -> Self {
        Self(Flow {
            schedule: Schedule::Concurrent,
            ..Flow::with_options(start, options)
        })
    }

    pub fn start(&self) -> &NodeRef {
        self.0.start()
    }

    pub fn options(&self) -> &FlowOptions {
        self.0.options()
    }

    pub fn into_node(self) -> NodeRef {
        self.0.into_node()
    }

    pub async fn run(&self, memory: impl Into<Memory>) -> CaskadaResult<ExecutionTree> {
        self.0.run(memory).await
    }
}

impl From<ParallelFlow> for Flow {
    fn from(flow: ParallelFlow) -> Self {
        flow.0
    }
}

impl NodeRef {
    /// Register a flow (sequential or parallel) as a node of another graph.
    pub fn from_flow(flow: impl Into<Flow>) -> NodeRef {
        flow.into().into_node()
    }
}
