use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Shr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use async_trait::async_trait;
use tracing::warn;

use crate::error::CaskadaResult;
use crate::lifecycle::{LifecycleAdapter, Node};
use crate::memory::Memory;
use crate::trigger::{Action, Trigger, Triggers, DEFAULT_ACTION};

/// Stable numeric identity of a registered node.
pub type NodeId = u64;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(0);

/// Object-safe view of a node that the flow engine drives.
///
/// Typed [`Node`] implementations are adapted automatically by
/// [`NodeRef::new`]; flows implement this trait directly.
#[async_trait]
pub trait BaseNode: Send + Sync + 'static {
    /// Fresh copy of the instance for one visit.
    fn clone_box(&self) -> Box<dyn BaseNode>;

    fn type_name(&self) -> &'static str;

    /// Run prep, exec (with retries) and post. Triggers recorded during post
    /// are left in `triggers`.
    async fn run_lifecycle(&mut self, memory: &mut Memory, triggers: &Triggers) -> CaskadaResult<()>;
}

struct NodeCell {
    id: NodeId,
    node: Box<dyn BaseNode>,
    successors: RwLock<BTreeMap<Action, Vec<Weak<NodeCell>>>>,
}

/// Owner of every node in one connected graph.
///
/// Edges between nodes are weak; the component holds the strong references.
/// Linking two graphs moves the nodes of one component into the other and
/// leaves a forwarding pointer behind, so handles taken before the link keep
/// the whole graph alive.
#[derive(Default)]
struct Component {
    state: Mutex<ComponentState>,
}

#[derive(Default)]
struct ComponentState {
    nodes: Vec<Arc<NodeCell>>,
    merged_into: Option<Arc<Component>>,
}

static MERGE_LOCK: Mutex<()> = Mutex::new(());

impl Component {
    fn owning(cell: Arc<NodeCell>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ComponentState {
                nodes: vec![cell],
                merged_into: None,
            }),
        })
    }

    fn root(self: &Arc<Self>) -> Arc<Component> {
        let mut current = self.clone();
        loop {
            let next = lock(&current.state).merged_into.clone();
            match next {
                Some(next) => current = next,
                None => return current,
            }
        }
    }

    fn merge(into: &Arc<Component>, from: &Arc<Component>) {
        let _guard = lock(&MERGE_LOCK);
        let (into, from) = (into.root(), from.root());
        if Arc::ptr_eq(&into, &from) {
            return;
        }
        let moved = {
            let mut state = lock(&from.state);
            state.merged_into = Some(into.clone());
            std::mem::take(&mut state.nodes)
        };
        lock(&into.state).nodes.extend(moved);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared handle to a node registered in a graph.
///
/// Cloning the handle is cheap and refers to the same vertex; use
/// [`NodeRef::deep_clone`] for an independent copy of the reachable graph.
/// A node lives as long as any handle into its connected graph does, so
/// cyclic graphs are freed with their last handle.
#[derive(Clone)]
pub struct NodeRef {
    cell: Arc<NodeCell>,
    component: Arc<Component>,
}

/// Branches produced by one propagate-mode run.
pub(crate) struct Propagation {
    pub(crate) branches: Vec<(Action, Memory)>,
    /// True when the node called `trigger` at least once.
    pub(crate) explicit: bool,
}

impl NodeRef {
    /// Register a typed node, assigning it the next id.
    pub fn new<N: Node>(node: N) -> Self {
        Self::from_base(Box::new(LifecycleAdapter::new(node)))
    }

    /// Register an already type-erased node.
    pub fn from_base(node: Box<dyn BaseNode>) -> Self {
        let id = NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed);
        Self::with_id(id, node)
    }

    fn with_id(id: NodeId, node: Box<dyn BaseNode>) -> Self {
        let cell = Arc::new(NodeCell {
            id,
            node,
            successors: RwLock::new(BTreeMap::new()),
        });
        Self {
            component: Component::owning(cell.clone()),
            cell,
        }
    }

    pub fn id(&self) -> NodeId {
        self.cell.id
    }

    pub fn type_name(&self) -> &'static str {
        self.cell.node.type_name()
    }

    /// `Type#id`, as used in logs and errors.
    pub fn label(&self) -> String {
        format!("{}#{}", self.type_name(), self.id())
    }

    /// Returns true if both handles refer to the same vertex.
    pub fn ptr_eq(&self, other: &NodeRef) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    /// Add `node` as a successor for `action`; returns the registered node.
    pub fn on(&self, action: impl Into<Action>, node: &NodeRef) -> NodeRef {
        Component::merge(&self.component, &node.component);
        self.write_successors()
            .entry(action.into())
            .or_default()
            .push(Arc::downgrade(&node.cell));
        node.clone()
    }

    /// Add `node` as a successor for the default action.
    pub fn next(&self, node: &NodeRef) -> NodeRef {
        self.on(DEFAULT_ACTION, node)
    }

    /// Add `node` as a successor for `action`; same as [`NodeRef::on`].
    pub fn next_on(&self, node: &NodeRef, action: impl Into<Action>) -> NodeRef {
        self.on(action, node)
    }

    /// Start an `a.action("x") >> &b` edge declaration.
    pub fn action(&self, action: impl Into<Action>) -> ActionLink<'_> {
        ActionLink {
            from: self,
            action: action.into(),
        }
    }

    /// Successors registered for `action`, in registration order.
    pub fn get_next_nodes(&self, action: &str) -> Vec<NodeRef> {
        let successors = self.read_successors();
        let next_nodes = successors
            .get(action)
            .map(|cells| self.handles(cells))
            .unwrap_or_default();
        if next_nodes.is_empty() && action != DEFAULT_ACTION && !successors.is_empty() {
            warn!(
                node = %self.label(),
                action,
                available = ?successors.keys().collect::<Vec<_>>(),
                "Flow ends: action not found in the node's defined successors"
            );
        }
        next_nodes
    }

    pub fn has_successors(&self) -> bool {
        self.read_successors().values().any(|nodes| !nodes.is_empty())
    }

    pub fn successor_actions(&self) -> Vec<Action> {
        self.read_successors().keys().cloned().collect()
    }

    /// Drop every outgoing edge of this node.
    pub fn clear_successors(&self) {
        self.write_successors().clear();
    }

    /// Copy this node and, recursively, its successors. Nodes reachable
    /// through several paths (including cycles) are copied once, so the copy
    /// has the same shape as the original. Ids are preserved.
    pub fn deep_clone(&self) -> NodeRef {
        let mut seen = HashMap::new();
        self.deep_clone_with(&mut seen)
    }

    fn deep_clone_with(&self, seen: &mut HashMap<usize, NodeRef>) -> NodeRef {
        let key = Arc::as_ptr(&self.cell) as usize;
        if let Some(cloned) = seen.get(&key) {
            return cloned.clone();
        }

        let cloned = NodeRef::with_id(self.id(), self.cell.node.clone_box());
        seen.insert(key, cloned.clone());

        let successors: Vec<(Action, Vec<NodeRef>)> = self
            .read_successors()
            .iter()
            .map(|(action, cells)| (action.clone(), self.handles(cells)))
            .collect();
        for (action, nodes) in successors {
            for node in nodes {
                let copy = node.deep_clone_with(seen);
                cloned.on(action.clone(), &copy);
            }
        }
        cloned
    }

    /// Fresh instance of the node for a single run.
    pub fn instantiate(&self) -> Box<dyn BaseNode> {
        self.cell.node.clone_box()
    }

    /// Run the node once in propagate mode, returning the `(action, memory)`
    /// branches its successors would receive.
    pub async fn run(&self, memory: impl Into<Memory>) -> CaskadaResult<Vec<(Action, Memory)>> {
        Ok(self.run_propagate(memory.into()).await?.branches)
    }

    pub(crate) async fn run_propagate(&self, mut memory: Memory) -> CaskadaResult<Propagation> {
        let mut instance = self.instantiate();
        let triggers = Triggers::new();
        instance.run_lifecycle(&mut memory, &triggers).await?;
        Ok(self.list_triggers(&memory, triggers.drain()))
    }

    /// Turn the recorded triggers into branches.
    ///
    /// Without an explicit trigger the node propagates the default action
    /// with an untouched memory copy, unless it has no successors at all, in
    /// which case nothing propagates.
    fn list_triggers(&self, memory: &Memory, pending: Vec<Trigger>) -> Propagation {
        if pending.is_empty() {
            let branches = if self.has_successors() {
                vec![(DEFAULT_ACTION.to_string(), memory.clone())]
            } else {
                Vec::new()
            };
            return Propagation {
                branches,
                explicit: false,
            };
        }

        let branches = pending
            .into_iter()
            .map(|trigger| {
                let branch = memory.fork(&trigger.forking_data);
                (trigger.action, branch)
            })
            .collect();
        Propagation {
            branches,
            explicit: true,
        }
    }

    /// Handles to successor cells; they share this node's component.
    fn handles(&self, cells: &[Weak<NodeCell>]) -> Vec<NodeRef> {
        cells
            .iter()
            .filter_map(Weak::upgrade)
            .map(|cell| NodeRef {
                cell,
                component: self.component.clone(),
            })
            .collect()
    }

    fn read_successors(&self) -> RwLockReadGuard<'_, BTreeMap<Action, Vec<Weak<NodeCell>>>> {
        self.cell
            .successors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_successors(&self) -> RwLockWriteGuard<'_, BTreeMap<Action, Vec<Weak<NodeCell>>>> {
        self.cell
            .successors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for NodeRef {}

/// `&a >> &b` registers `b` as the default successor of `a`.
impl Shr<&NodeRef> for &NodeRef {
    type Output = NodeRef;

    fn shr(self, rhs: &NodeRef) -> NodeRef {
        self.next(rhs)
    }
}

impl Shr<&NodeRef> for NodeRef {
    type Output = NodeRef;

    fn shr(self, rhs: &NodeRef) -> NodeRef {
        self.next(rhs)
    }
}

/// Pending edge created by [`NodeRef::action`].
pub struct ActionLink<'a> {
    from: &'a NodeRef,
    action: Action,
}

impl Shr<&NodeRef> for ActionLink<'_> {
    type Output = NodeRef;

    fn shr(self, rhs: &NodeRef) -> NodeRef {
        self.from.on(self.action, rhs)
    }
}
