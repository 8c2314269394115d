//! Dual-scope memory shared between the nodes of a run.
//!
//! A [`Memory`] pairs one [`GlobalStore`] handle, shared by reference across
//! every branch of a run, with a branch-local [`Store`] that is deep-copied at
//! each fork. Reads resolve local-first, writes always land in the global
//! store.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{CaskadaError, CaskadaResult};

/// A key-value map of JSON values.
pub type Store = Map<String, Value>;

/// Names that cannot be written through [`Memory::set`].
pub const RESERVED_KEYS: [&str; 6] = ["global", "local", "_global", "_local", "clone", "create"];

/// The per-run shared store. Cloning the handle shares the same map.
#[derive(Clone, Default)]
pub struct GlobalStore {
    inner: Arc<RwLock<Store>>,
}

impl GlobalStore {
    pub fn new(store: Store) -> Self {
        Self {
            inner: Arc::new(RwLock::new(store)),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Copy the current contents out of the shared map.
    pub fn snapshot(&self) -> Store {
        self.read().clone()
    }

    /// Returns true if both handles point at the same map.
    pub fn ptr_eq(&self, other: &GlobalStore) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn insert(&self, key: String, value: Value) {
        self.write().insert(key, value);
    }

    fn remove(&self, key: &str) -> Option<Value> {
        self.write().remove(key)
    }

    fn read(&self) -> RwLockReadGuard<'_, Store> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Store> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for GlobalStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GlobalStore").field(&*self.read()).finish()
    }
}

impl From<Store> for GlobalStore {
    fn from(store: Store) -> Self {
        Self::new(store)
    }
}

/// Branch view over the global store plus a branch-local store.
///
/// `Clone` produces a fork with no forking data: the global handle is shared,
/// the local store is copied by value.
#[derive(Debug, Clone, Default)]
pub struct Memory {
    global: GlobalStore,
    local: Store,
}

impl Memory {
    pub fn new(global: impl Into<GlobalStore>) -> Self {
        Self {
            global: global.into(),
            local: Store::new(),
        }
    }

    pub fn with_local(global: impl Into<GlobalStore>, local: Store) -> Self {
        Self {
            global: global.into(),
            local,
        }
    }

    /// Build a memory from a JSON object literal.
    pub fn from_value(value: Value) -> CaskadaResult<Self> {
        match value {
            Value::Object(store) => Ok(Self::new(store)),
            other => Err(CaskadaError::Configuration(format!(
                "initial state must be a JSON object, got {other}"
            ))),
        }
    }

    /// Local value if present, else the global one.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.local.get(key).cloned().or_else(|| self.global.get(key))
    }

    /// Typed read through [`Memory::get`].
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> CaskadaResult<Option<T>> {
        self.get(key)
            .map(serde_json::from_value)
            .transpose()
            .map_err(CaskadaError::from)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.local.contains_key(key) || self.global.contains(key)
    }

    /// Write to the global store, evicting a shadowing local value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Serialize) -> CaskadaResult<()> {
        let key = key.into();
        if RESERVED_KEYS.contains(&key.as_str()) {
            return Err(CaskadaError::Configuration(format!(
                "Reserved property '{key}' cannot be set"
            )));
        }
        let value = serde_json::to_value(value)?;
        self.local.remove(&key);
        self.global.insert(key, value);
        Ok(())
    }

    /// Remove a key from both scopes, returning the value that was visible.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let local = self.local.remove(key);
        let global = self.global.remove(key);
        local.or(global)
    }

    pub fn local(&self) -> &Store {
        &self.local
    }

    pub fn get_local(&self, key: &str) -> Option<&Value> {
        self.local.get(key)
    }

    /// Write to the local store only; never visible outside this branch.
    pub fn set_local(&mut self, key: impl Into<String>, value: impl Serialize) -> CaskadaResult<()> {
        let value = serde_json::to_value(value)?;
        self.local.insert(key.into(), value);
        Ok(())
    }

    pub fn remove_local(&mut self, key: &str) -> Option<Value> {
        self.local.remove(key)
    }

    pub fn global(&self) -> &GlobalStore {
        &self.global
    }

    /// New branch memory: same global store, local = deep copy of this local
    /// store deep-merged with a deep copy of `forking_data`.
    pub fn fork(&self, forking_data: &Store) -> Memory {
        let mut local = self.local.clone();
        deep_merge(&mut local, forking_data.clone());
        Memory {
            global: self.global.clone(),
            local,
        }
    }
}

impl From<Store> for Memory {
    fn from(store: Store) -> Self {
        Self::new(store)
    }
}

impl From<GlobalStore> for Memory {
    fn from(global: GlobalStore) -> Self {
        Self::new(global)
    }
}

/// Merge `overlay` into `target`. Objects present on both sides are merged key
/// by key; any other overlay value replaces the target value.
pub fn deep_merge(target: &mut Store, overlay: Store) {
    for (key, incoming) in overlay {
        let merged = match (target.remove(&key), incoming) {
            (Some(Value::Object(mut existing)), Value::Object(nested)) => {
                deep_merge(&mut existing, nested);
                Value::Object(existing)
            }
            (_, value) => value,
        };
        target.insert(key, merged);
    }
}
