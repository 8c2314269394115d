mod helpers;

use std::time::Duration;

use caskada_core::{CaskadaError, ExecutionTree, Flow, Memory, NodeRef, ParallelFlow, Store};
use helpers::{init_tracing, names, visit_log, StepNode, VisitLog};
use serde_json::json;
use tokio::time::Instant;

fn leaf(node: &NodeRef) -> ExecutionTree {
    ExecutionTree::new(node.id(), node.type_name())
}

/// `fan` triggers "a" and "b", each leading to a node sleeping `delay`.
fn two_slow_branches(log: &VisitLog, delay: Duration) -> NodeRef {
    let fan = NodeRef::new(
        StepNode::new("fan", log)
            .trigger("a", json!({}))
            .trigger("b", json!({})),
    );
    fan.on("a", &NodeRef::new(StepNode::new("slow_a", log).delay(delay)));
    fan.on("b", &NodeRef::new(StepNode::new("slow_b", log).delay(delay)));
    fan
}

#[tokio::test(start_paused = true)]
async fn test_parallel_branches_overlap_in_time() {
    init_tracing();
    let log = visit_log();
    let fan = two_slow_branches(&log, Duration::from_millis(100));

    let start = Instant::now();
    ParallelFlow::new(&fan).run(Store::new()).await.unwrap();
    let parallel = start.elapsed();

    let start = Instant::now();
    Flow::new(&fan).run(Store::new()).await.unwrap();
    let sequential = start.elapsed();

    assert!(parallel >= Duration::from_millis(100), "{parallel:?}");
    assert!(parallel < Duration::from_millis(150), "{parallel:?}");
    assert!(sequential >= Duration::from_millis(200), "{sequential:?}");
    assert_eq!(names(&log).len(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_results_keep_registration_order() {
    let log = visit_log();
    let fan = NodeRef::new(StepNode::new("fan", &log).trigger("go", json!({})));
    let first = NodeRef::new(StepNode::new("first", &log).delay(Duration::from_millis(300)));
    let second = NodeRef::new(StepNode::new("second", &log).delay(Duration::from_millis(100)));
    let third = NodeRef::new(StepNode::new("third", &log).delay(Duration::from_millis(200)));
    fan.on("go", &first);
    fan.on("go", &second);
    fan.on("go", &third);

    let tree = ParallelFlow::new(&fan).run(Store::new()).await.unwrap();

    assert_eq!(
        tree,
        leaf(&fan).with_branch("go", vec![leaf(&first), leaf(&second), leaf(&third)])
    );
    assert_eq!(names(&log), vec!["fan", "second", "third", "first"]);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_global_writes_are_last_write_wins() {
    let log = visit_log();
    let fan = NodeRef::new(StepNode::new("fan", &log).trigger("go", json!({})));
    let slow = NodeRef::new(
        StepNode::new("slow", &log)
            .delay(Duration::from_millis(50))
            .write("winner", json!("slow")),
    );
    let fast = NodeRef::new(
        StepNode::new("fast", &log)
            .delay(Duration::from_millis(10))
            .write("winner", json!("fast")),
    );
    fan.on("go", &slow);
    fan.on("go", &fast);

    let memory = Memory::default();
    ParallelFlow::new(&fan).run(memory.clone()).await.unwrap();
    assert_eq!(memory.get("winner"), Some(json!("slow")));

    let memory = Memory::default();
    Flow::new(&fan).run(memory.clone()).await.unwrap();
    assert_eq!(memory.get("winner"), Some(json!("fast")));
}

#[tokio::test(start_paused = true)]
async fn test_first_error_returned_after_siblings_complete() {
    init_tracing();
    let log = visit_log();
    let fan = NodeRef::new(StepNode::new("fan", &log).trigger("go", json!({})));
    let broken = NodeRef::new(StepNode::new("broken", &log).failing());
    let slow = NodeRef::new(
        StepNode::new("slow", &log)
            .delay(Duration::from_millis(50))
            .write("slow_done", json!(true)),
    );
    fan.on("go", &broken);
    fan.on("go", &slow);

    let memory = Memory::default();
    let start = Instant::now();
    let err = ParallelFlow::new(&fan).run(memory.clone()).await.unwrap_err();

    assert!(matches!(err.root_cause(), CaskadaError::Execution(m) if m.contains("broken")));
    assert!(start.elapsed() >= Duration::from_millis(50));
    assert_eq!(names(&log), vec!["fan", "slow"]);
    assert_eq!(memory.get("slow_done"), Some(json!(true)));

    // The sequential flow never starts the sibling.
    let log_before = names(&log).len();
    Flow::new(&fan).run(Store::new()).await.unwrap_err();
    assert_eq!(names(&log).len(), log_before + 1);
}

#[tokio::test(start_paused = true)]
async fn test_parallel_sub_flow_inside_sequential_flow() {
    let log = visit_log();
    let fan = two_slow_branches(&log, Duration::from_millis(100));
    let sub_flow = ParallelFlow::new(&fan).into_node();
    let after = NodeRef::new(StepNode::new("after", &log));
    sub_flow.next(&after);

    let start = Instant::now();
    let tree = Flow::new(&sub_flow).run(Store::new()).await.unwrap();

    assert!(start.elapsed() < Duration::from_millis(150));
    assert_eq!(sub_flow.type_name(), "ParallelFlow");
    assert_eq!(tree, leaf(&sub_flow).with_branch("default", vec![leaf(&after)]));
    assert_eq!(names(&log).last().map(String::as_str), Some("after"));
}
