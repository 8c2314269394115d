use async_trait::async_trait;
use tracing::debug;

use crate::error::{CaskadaError, CaskadaResult};
use crate::memory::Memory;
use crate::node::BaseNode;
use crate::retry::{exec_with_retry, Attempt, RetryPolicy};
use crate::trigger::Triggers;

/// A unit of work with a prep/exec/post lifecycle.
///
/// Implementors are templates: the engine clones the value before every run,
/// so `&mut self` state (counters, caches) never leaks between visits. Share
/// state that should survive a run through an `Arc`.
///
/// Every phase defaults to a no-op.
#[async_trait]
pub trait Node: Clone + Send + Sync + 'static {
    /// Output type from the preparation phase
    type PrepResult: Clone + Default + Send + Sync + 'static;

    /// Output type from the execution phase
    type ExecResult: Clone + Default + Send + Sync + 'static;

    /// Name shown in execution trees and logs.
    fn type_name(&self) -> &'static str {
        short_type_name(std::any::type_name::<Self>())
    }

    /// Retry budget for the exec phase. Defaults to a single attempt.
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Preparation phase - read and seed memory
    async fn prep(&mut self, _memory: &mut Memory) -> CaskadaResult<Self::PrepResult> {
        Ok(Self::PrepResult::default())
    }

    /// Execution phase - the core computation; receives only the prep result
    async fn exec(
        &mut self,
        _prep: Self::PrepResult,
        _attempt: &Attempt,
    ) -> CaskadaResult<Self::ExecResult> {
        Ok(Self::ExecResult::default())
    }

    /// Called once exec has failed on every attempt. Re-raises by default.
    async fn exec_fallback(
        &mut self,
        _prep: Self::PrepResult,
        _attempt: &Attempt,
        error: CaskadaError,
    ) -> CaskadaResult<Self::ExecResult> {
        Err(error)
    }

    /// Post-processing phase - write results and trigger successors
    async fn post(
        &mut self,
        _memory: &mut Memory,
        _prep: Self::PrepResult,
        _exec: Self::ExecResult,
        _triggers: &Triggers,
    ) -> CaskadaResult<()> {
        Ok(())
    }
}

/// Strip the module path and generic arguments from a type name.
pub(crate) fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Run the three phases on `node`, keeping the trigger window open for post only.
pub(crate) async fn run_phases<N: Node>(
    node: &mut N,
    memory: &mut Memory,
    triggers: &Triggers,
) -> CaskadaResult<N::ExecResult> {
    let name = node.type_name();

    debug!(node = name, "Starting prep phase");
    let prep_result = node.prep(memory).await?;

    debug!(node = name, "Starting exec phase");
    let exec_result = exec_with_retry(node, prep_result.clone()).await?;

    debug!(node = name, "Starting post phase");
    triggers.open();
    let posted = node
        .post(memory, prep_result, exec_result.clone(), triggers)
        .await;
    triggers.close();
    posted?;

    Ok(exec_result)
}

/// Run a node once outside any flow and return its exec result.
///
/// The node is cloned first; triggers recorded during post are discarded.
pub async fn run_node<N: Node>(node: &N, memory: impl Into<Memory>) -> CaskadaResult<N::ExecResult> {
    let mut instance = node.clone();
    let mut memory = memory.into();
    run_phases(&mut instance, &mut memory, &Triggers::new()).await
}

/// Adapter exposing a typed [`Node`] through the object-safe [`BaseNode`].
pub(crate) struct LifecycleAdapter<N> {
    inner: N,
}

impl<N: Node> LifecycleAdapter<N> {
    pub(crate) fn new(inner: N) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<N: Node> BaseNode for LifecycleAdapter<N> {
    fn clone_box(&self) -> Box<dyn BaseNode> {
        Box::new(Self {
            inner: self.inner.clone(),
        })
    }

    fn type_name(&self) -> &'static str {
        self.inner.type_name()
    }

    async fn run_lifecycle(&mut self, memory: &mut Memory, triggers: &Triggers) -> CaskadaResult<()> {
        run_phases(&mut self.inner, memory, triggers).await.map(|_| ())
    }
}
