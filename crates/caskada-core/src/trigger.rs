use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{CaskadaError, CaskadaResult};
use crate::memory::Store;

/// Label on a graph edge selecting which successors run next.
pub type Action = String;

/// Action used when a node finishes without triggering anything explicitly.
pub const DEFAULT_ACTION: &str = "default";

/// An action declared during post, with the data forked into the new branch.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub action: Action,
    pub forking_data: Store,
}

impl Trigger {
    pub fn new(action: impl Into<Action>, forking_data: Store) -> Self {
        Self {
            action: action.into(),
            forking_data,
        }
    }
}

#[derive(Debug, Default)]
struct TriggerBuffer {
    open: bool,
    pending: Vec<Trigger>,
}

/// Trigger buffer of one node run.
///
/// The buffer only accepts triggers while the post window is open; the handle
/// is cheap to clone but every clone refers to the same window.
#[derive(Debug, Clone, Default)]
pub struct Triggers {
    inner: Arc<Mutex<TriggerBuffer>>,
}

impl Triggers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger `action` with no forking data.
    pub fn trigger(&self, action: impl Into<Action>) -> CaskadaResult<()> {
        self.trigger_with(action, Store::new())
    }

    /// Trigger `action`, overlaying `forking_data` on the successor branch's
    /// local store.
    pub fn trigger_with(&self, action: impl Into<Action>, forking_data: Store) -> CaskadaResult<()> {
        let mut buffer = self.lock();
        if !buffer.open {
            return Err(CaskadaError::TriggerMisuse(
                "An action can only be triggered inside post()".into(),
            ));
        }
        buffer.pending.push(Trigger::new(action, forking_data));
        Ok(())
    }

    /// Triggers recorded so far, in call order.
    pub fn pending(&self) -> Vec<Trigger> {
        self.lock().pending.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }

    pub(crate) fn open(&self) {
        self.lock().open = true;
    }

    pub(crate) fn close(&self) {
        self.lock().open = false;
    }

    /// Record a trigger on behalf of the engine, regardless of the window.
    pub(crate) fn forward(&self, trigger: Trigger) {
        self.lock().pending.push(trigger);
    }

    pub(crate) fn drain(&self) -> Vec<Trigger> {
        std::mem::take(&mut self.lock().pending)
    }

    fn lock(&self) -> MutexGuard<'_, TriggerBuffer> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
