//! Central scheduler end-to-end scenarios over the in-process broker.

mod common;

use std::sync::Arc;

use common::{push_pending, register_node, task};
use loadtrace::core::broker::{Broker, MemoryBroker, keys};
use loadtrace::core::scheduler::{
    CentralScheduler, DispatchOutcome, SchedulerSettings, Weigher, WeigherOrder,
};
use loadtrace::core::task::TaskEnvelope;

fn scheduler(broker: &MemoryBroker, settings: SchedulerSettings) -> CentralScheduler {
    CentralScheduler::new(Arc::new(broker.clone()), settings)
}

async fn complete_on(broker: &MemoryBroker, node: &str) -> TaskEnvelope {
    // Simulate the worker side of one completion: consume the queue
    // entry, return capacity, drop the in-flight count.
    let raw = broker
        .pop_head(&keys::node_queue(node))
        .await
        .unwrap()
        .expect("queued task");
    let task = TaskEnvelope::from_json(&raw).unwrap();
    broker
        .incr_by(&keys::capacity(node), task.cpu_units() as i64)
        .await
        .unwrap();
    broker.incr_by(&keys::run_count(node), -1).await.unwrap();
    task
}

/// Scenario: three 1-unit tasks through a single 1-unit node complete
/// in submission order, run_count cycling 0 -> 1 -> 0 each time.
#[tokio::test]
async fn test_fifo_order_preserved_under_capacity_one() {
    let broker = MemoryBroker::new();
    register_node(&broker, "n1", 1).await;
    for seq in 0..3u64 {
        push_pending(&broker, &task(&format!("job{seq}"), 1, seq)).await;
    }
    let mut sched = scheduler(&broker, SchedulerSettings::default());

    let mut completed = Vec::new();
    for _ in 0..3 {
        let outcome = sched.dispatch_once().await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Dispatched { .. }));
        assert_eq!(broker.get_i64(&keys::run_count("n1")).await.unwrap(), 1);
        // Capacity exhausted: the next head must block.
        assert_eq!(sched.dispatch_once().await.unwrap(), DispatchOutcome::Idle);
        let done = complete_on(&broker, "n1").await;
        assert_eq!(broker.get_i64(&keys::run_count("n1")).await.unwrap(), 0);
        completed.push(done.seq.unwrap());
    }
    assert_eq!(completed, vec![0, 1, 2]);
    assert_eq!(broker.get_i64(&keys::capacity("n1")).await.unwrap(), 1);
}

/// Scenario: 3-unit tasks skip a 2-unit node entirely and drain
/// through the 3-unit node in order.
#[tokio::test]
async fn test_capacity_constraint_routes_around_small_node() {
    let broker = MemoryBroker::new();
    register_node(&broker, "a", 2).await;
    register_node(&broker, "b", 3).await;
    push_pending(&broker, &task("big0", 3, 0)).await;
    push_pending(&broker, &task("big1", 3, 1)).await;
    let mut sched = scheduler(&broker, SchedulerSettings::default());

    let first = sched.dispatch_once().await.unwrap();
    assert_eq!(
        first,
        DispatchOutcome::Dispatched {
            node: "b".to_string(),
            capacity_only: true
        }
    );
    // b is out of capacity and a never qualifies.
    assert_eq!(sched.dispatch_once().await.unwrap(), DispatchOutcome::Idle);
    complete_on(&broker, "b").await;

    let second = sched.dispatch_once().await.unwrap();
    assert!(matches!(
        second,
        DispatchOutcome::Dispatched { ref node, .. } if node == "b"
    ));
    complete_on(&broker, "b").await;

    assert_eq!(broker.get_i64(&keys::capacity("a")).await.unwrap(), 2);
    assert_eq!(broker.get_i64(&keys::capacity("b")).await.unwrap(), 3);
    assert_eq!(broker.length(&keys::node_queue("a")).await.unwrap(), 0);
}

/// Scenario: a stray slot token for a capacity-less node must not
/// deadlock the queue; the capacity-only fallback dispatches to the
/// live node.
#[tokio::test]
async fn test_stale_token_fallback_avoids_deadlock() {
    let broker = MemoryBroker::new();
    register_node(&broker, "dead", 0).await;
    register_node(&broker, "live", 2).await;
    broker.append_tail(keys::SLOTS, "dead").await.unwrap();
    push_pending(&broker, &task("job", 1, 0)).await;
    let mut sched = scheduler(&broker, SchedulerSettings::default());

    let outcome = sched.dispatch_once().await.unwrap();
    assert_eq!(
        outcome,
        DispatchOutcome::Dispatched {
            node: "live".to_string(),
            capacity_only: true
        }
    );
    assert_eq!(sched.stats().capacity_only, 1);
    assert_eq!(broker.length(&keys::node_queue("live")).await.unwrap(), 1);
}

/// Scenario: min instance-count weigher prefers the idle node.
#[tokio::test]
async fn test_instance_count_weigher_prefers_idle_node() {
    let broker = MemoryBroker::new();
    register_node(&broker, "a", 4).await;
    register_node(&broker, "b", 4).await;
    broker.set(&keys::run_count("a"), "2").await.unwrap();
    broker.set(&keys::run_count("b"), "0").await.unwrap();
    push_pending(&broker, &task("job", 1, 0)).await;
    let settings = SchedulerSettings {
        weigher: Weigher::Instances,
        weigher_order: WeigherOrder::Min,
        ..SchedulerSettings::default()
    };
    let mut sched = scheduler(&broker, settings);

    let outcome = sched.dispatch_once().await.unwrap();
    assert!(matches!(
        outcome,
        DispatchOutcome::Dispatched { ref node, .. } if node == "b"
    ));
}

/// Slot-gated dispatch: tokens are consumed and returned around the
/// capacity check.
#[tokio::test]
async fn test_slot_tokens_gate_dispatch() {
    let broker = MemoryBroker::new();
    register_node(&broker, "n1", 4).await;
    broker.append_tail(keys::SLOTS, "n1").await.unwrap();
    push_pending(&broker, &task("one", 1, 0)).await;
    push_pending(&broker, &task("two", 1, 1)).await;
    let mut sched = scheduler(&broker, SchedulerSettings::default());

    assert!(matches!(
        sched.dispatch_once().await.unwrap(),
        DispatchOutcome::Dispatched { capacity_only: false, .. }
    ));
    assert_eq!(broker.length(keys::SLOTS).await.unwrap(), 0);
    // Capacity remains but the token bag is empty: the fallback path
    // still dispatches by capacity to avoid stalling.
    assert!(matches!(
        sched.dispatch_once().await.unwrap(),
        DispatchOutcome::Dispatched { capacity_only: true, .. }
    ));
}

/// Capacity accounting closes over a run: issued minus returned equals
/// in-flight at every step.
#[tokio::test]
async fn test_capacity_ledger_balances() {
    let broker = MemoryBroker::new();
    register_node(&broker, "n1", 6).await;
    for seq in 0..4u64 {
        push_pending(&broker, &task(&format!("j{seq}"), 2, seq)).await;
    }
    let mut sched = scheduler(&broker, SchedulerSettings::default());

    // Dispatch until capacity blocks: 3 tasks of 2 units fit in 6.
    let mut dispatched = 0;
    while let DispatchOutcome::Dispatched { .. } = sched.dispatch_once().await.unwrap() {
        dispatched += 1;
    }
    assert_eq!(dispatched, 3);
    let cap = broker.get_i64(&keys::capacity("n1")).await.unwrap();
    let inflight = broker.get_i64(&keys::run_count("n1")).await.unwrap();
    assert_eq!(cap, 0);
    assert_eq!(inflight, 3);
    assert_eq!(6 - cap, inflight * 2);

    for _ in 0..3 {
        complete_on(&broker, "n1").await;
    }
    assert_eq!(broker.get_i64(&keys::capacity("n1")).await.unwrap(), 6);
}
