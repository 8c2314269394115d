use caskada_core::{
    async_trait, Attempt, CaskadaResult, Flow, Memory, Node, NodeRef, ParallelFlow, Store, Triggers,
};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use std::time::Duration;

/// Increments a global counter and passes control on.
#[derive(Clone)]
struct Increment;

#[async_trait]
impl Node for Increment {
    type PrepResult = i64;
    type ExecResult = i64;

    async fn prep(&mut self, memory: &mut Memory) -> CaskadaResult<i64> {
        Ok(memory.get_as("counter")?.unwrap_or_default())
    }

    async fn exec(&mut self, counter: i64, _attempt: &Attempt) -> CaskadaResult<i64> {
        Ok(counter + 1)
    }

    async fn post(
        &mut self,
        memory: &mut Memory,
        _prep: i64,
        counter: i64,
        _triggers: &Triggers,
    ) -> CaskadaResult<()> {
        memory.set("counter", counter)
    }
}

/// Fans out to every successor with a per-branch local value.
#[derive(Clone)]
struct FanOut {
    width: usize,
}

#[async_trait]
impl Node for FanOut {
    type PrepResult = ();
    type ExecResult = ();

    async fn post(
        &mut self,
        _memory: &mut Memory,
        _prep: (),
        _exec: (),
        triggers: &Triggers,
    ) -> CaskadaResult<()> {
        for i in 0..self.width {
            let data = json!({ "branch": i }).as_object().cloned().unwrap_or_default();
            triggers.trigger_with(format!("branch_{i}"), data)?;
        }
        Ok(())
    }
}

fn linear_chain(len: usize) -> NodeRef {
    let start = NodeRef::new(Increment);
    let mut tail = start.clone();
    for _ in 1..len {
        tail = tail.next(&NodeRef::new(Increment));
    }
    start
}

fn fan_out(width: usize) -> NodeRef {
    let start = NodeRef::new(FanOut { width });
    for i in 0..width {
        start.on(format!("branch_{i}"), &NodeRef::new(Increment));
    }
    start
}

fn benchmark_linear_flow(c: &mut Criterion) {
    let mut group = c.benchmark_group("flow_execution");
    group.measurement_time(Duration::from_secs(10));

    for len in [1, 10, 15] {
        let flow = Flow::new(&linear_chain(len));
        group.bench_with_input(BenchmarkId::new("linear", len), &flow, |b, flow| {
            b.to_async(tokio::runtime::Runtime::new().unwrap())
                .iter(|| async { flow.run(Store::new()).await.unwrap() })
        });
    }

    group.finish();
}

fn benchmark_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");

    for width in [4, 32] {
        let start = fan_out(width);
        let sequential = Flow::new(&start);
        let parallel = ParallelFlow::new(&start);

        group.bench_with_input(BenchmarkId::new("sequential", width), &sequential, |b, flow| {
            b.to_async(tokio::runtime::Runtime::new().unwrap())
                .iter(|| async { flow.run(Store::new()).await.unwrap() })
        });
        group.bench_with_input(BenchmarkId::new("parallel", width), &parallel, |b, flow| {
            b.to_async(tokio::runtime::Runtime::new().unwrap())
                .iter(|| async { flow.run(Store::new()).await.unwrap() })
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_linear_flow, benchmark_fan_out);
criterion_main!(benches);
