#![allow(dead_code)]

use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use caskada_core::{
    async_trait, Attempt, CaskadaError, CaskadaResult, Memory, Node, Store, Triggers,
};
use serde_json::Value;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = fmt().with_env_filter(filter).with_test_writer().try_init();
    });
}

/// What a [`StepNode`] observed when its post phase ran.
#[derive(Debug, Clone)]
pub struct Visit {
    pub name: String,
    pub local: Store,
    pub global: Store,
}

pub type VisitLog = Arc<Mutex<Vec<Visit>>>;

pub fn visit_log() -> VisitLog {
    Arc::default()
}

/// Names of the visits in completion order.
pub fn names(log: &VisitLog) -> Vec<String> {
    log.lock().unwrap().iter().map(|visit| visit.name.clone()).collect()
}

pub fn visits_of(log: &VisitLog, name: &str) -> Vec<Visit> {
    log.lock()
        .unwrap()
        .iter()
        .filter(|visit| visit.name == name)
        .cloned()
        .collect()
}

pub fn object(value: Value) -> Store {
    value.as_object().cloned().unwrap_or_default()
}

/// Configurable node that logs its visit, writes global keys and triggers
/// actions from post.
#[derive(Clone)]
pub struct StepNode {
    name: String,
    log: VisitLog,
    triggers: Vec<(String, Store)>,
    writes: Vec<(String, Value)>,
    delay: Duration,
    fail: bool,
}

impl StepNode {
    pub fn new(name: impl Into<String>, log: &VisitLog) -> Self {
        Self {
            name: name.into(),
            log: log.clone(),
            triggers: Vec::new(),
            writes: Vec::new(),
            delay: Duration::ZERO,
            fail: false,
        }
    }

    pub fn trigger(mut self, action: impl Into<String>, forking_data: Value) -> Self {
        self.triggers.push((action.into(), object(forking_data)));
        self
    }

    pub fn write(mut self, key: impl Into<String>, value: Value) -> Self {
        self.writes.push((key.into(), value));
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

#[async_trait]
impl Node for StepNode {
    type PrepResult = ();
    type ExecResult = ();

    async fn exec(&mut self, _prep: (), _attempt: &Attempt) -> CaskadaResult<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(CaskadaError::node_execution(&self.name, "planned failure"));
        }
        Ok(())
    }

    async fn post(
        &mut self,
        memory: &mut Memory,
        _prep: (),
        _exec: (),
        triggers: &Triggers,
    ) -> CaskadaResult<()> {
        self.log.lock().unwrap().push(Visit {
            name: self.name.clone(),
            local: memory.local().clone(),
            global: memory.global().snapshot(),
        });
        for (key, value) in &self.writes {
            memory.set(key.clone(), value)?;
        }
        for (action, data) in &self.triggers {
            triggers.trigger_with(action.clone(), data.clone())?;
        }
        Ok(())
    }
}
