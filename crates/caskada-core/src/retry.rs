//! Retry integration for the exec phase.
//!
//! Every node runs its exec phase through [`exec_with_retry`] using the policy
//! returned by [`Node::retry_policy`]; the default policy makes a single
//! attempt. Wrap a node in [`RetryNode`] (or call [`with_retry`]) to give it a
//! different budget without touching its implementation.
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CaskadaError, CaskadaResult};
use crate::lifecycle::Node;
use crate::memory::Memory;
use crate::trigger::Triggers;

/// Policy controlling how often exec is attempted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_retries: usize,
    /// Fixed delay between a failed attempt and the next one.
    pub wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            wait: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// Construct a new RetryPolicy.
    pub fn new(max_retries: usize, wait: Duration) -> Self {
        Self { max_retries, wait }
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn validate(&self) -> CaskadaResult<()> {
        if self.max_retries == 0 {
            return Err(CaskadaError::Configuration(
                "max_retries must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// The attempt exec (or the fallback) is currently running for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Attempt {
    /// 0-indexed retry number.
    pub cur_retry: usize,
    pub max_retries: usize,
}

impl Attempt {
    pub fn is_first(&self) -> bool {
        self.cur_retry == 0
    }

    pub fn is_last(&self) -> bool {
        self.cur_retry + 1 >= self.max_retries
    }
}

/// Run `node.exec` under its retry policy, routing the final failure to
/// `exec_fallback`.
pub(crate) async fn exec_with_retry<N: Node>(
    node: &mut N,
    prep: N::PrepResult,
) -> CaskadaResult<N::ExecResult> {
    let policy = node.retry_policy();
    policy.validate()?;

    let mut cur_retry = 0;
    loop {
        let attempt = Attempt {
            cur_retry,
            max_retries: policy.max_retries,
        };
        match node.exec(prep.clone(), &attempt).await {
            Ok(result) => return Ok(result),
            Err(error) if !attempt.is_last() => {
                debug!(
                    node = node.type_name(),
                    attempt = cur_retry,
                    error = %error,
                    "exec failed, retrying after wait"
                );
                if !policy.wait.is_zero() {
                    tokio::time::sleep(policy.wait).await;
                }
                cur_retry += 1;
            }
            Err(error) => {
                warn!(
                    node = node.type_name(),
                    attempts = policy.max_retries,
                    error = %error,
                    "exec retries exhausted, calling fallback"
                );
                let error = error.with_retry_count(cur_retry);
                return node.exec_fallback(prep, &attempt, error).await;
            }
        }
    }
}

/// Wrap an existing node with a different retry policy.
///
/// # Example
///
/// ```rust
/// use caskada_core::*;
/// use std::time::Duration;
///
/// #[derive(Clone)]
/// struct Flaky;
///
/// #[async_trait::async_trait]
/// impl Node for Flaky {
///     type PrepResult = ();
///     type ExecResult = ();
/// }
///
/// let node = with_retry(Flaky, RetryPolicy::new(3, Duration::from_millis(50)));
/// assert_eq!(node.retry_policy().max_retries, 3);
/// ```
pub fn with_retry<N>(node: N, policy: RetryPolicy) -> RetryNode<N> {
    RetryNode::new(node, policy)
}

/// Node wrapper that overrides the retry policy of the inner node.
#[derive(Clone, Debug)]
pub struct RetryNode<N> {
    /// Inner node to invoke.
    pub inner: N,
    /// Policy controlling retry attempts and wait.
    pub policy: RetryPolicy,
}

impl<N> RetryNode<N> {
    pub fn new(inner: N, policy: RetryPolicy) -> Self {
        RetryNode { inner, policy }
    }
}

#[async_trait]
impl<N: Node> Node for RetryNode<N> {
    type PrepResult = N::PrepResult;
    type ExecResult = N::ExecResult;

    fn type_name(&self) -> &'static str {
        self.inner.type_name()
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    async fn prep(&mut self, memory: &mut Memory) -> CaskadaResult<Self::PrepResult> {
        self.inner.prep(memory).await
    }

    async fn exec(
        &mut self,
        prep: Self::PrepResult,
        attempt: &Attempt,
    ) -> CaskadaResult<Self::ExecResult> {
        self.inner.exec(prep, attempt).await
    }

    async fn exec_fallback(
        &mut self,
        prep: Self::PrepResult,
        attempt: &Attempt,
        error: CaskadaError,
    ) -> CaskadaResult<Self::ExecResult> {
        self.inner.exec_fallback(prep, attempt, error).await
    }

    async fn post(
        &mut self,
        memory: &mut Memory,
        prep: Self::PrepResult,
        exec: Self::ExecResult,
        triggers: &Triggers,
    ) -> CaskadaResult<()> {
        self.inner.post(memory, prep, exec, triggers).await
    }
}
