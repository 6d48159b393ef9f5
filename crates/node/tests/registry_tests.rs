//! # Integration Tests - Node Registry
//!
//! ## Coverage
//!
//! - Storage invariant across create / allocate / deallocate / scale / merge
//! - Capacity errors never partially allocate
//! - Allocate → deallocate restores available storage exactly
//! - Merge of 1000/500/500 into an optimization node
//! - Task execution formula, failure capture, offline node handling
//! - Rebalance moves the oldest low-priority allocation to a better node
//! - Parallel allocation keeps the invariant

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use harvest_common::{EntityKind, HarvestError, NodeStatus, NodeType, NodeTypeTable, Priority};
use harvest_node::{
    AllocationRequest, NodeRegistry, OptimizationTask, TaskRunError, TaskRunner, TaskStatus,
    TaskType,
};

// ════════════════════════════════════════════════════════════════════════════════
// HELPERS
// ════════════════════════════════════════════════════════════════════════════════

fn registry() -> NodeRegistry {
    NodeRegistry::new(NodeTypeTable::default())
}

fn assert_balanced(registry: &NodeRegistry) {
    for node in registry.list_nodes() {
        assert!(
            node.storage_balanced(),
            "node {} unbalanced: used {} + available {} != capacity {}",
            node.id,
            node.used_storage,
            node.available_storage,
            node.storage_capacity
        );
    }
}

/// Runner that fails every task with a fixed message.
struct FailingRunner;

#[async_trait]
impl TaskRunner for FailingRunner {
    async fn run(&self, _task: &OptimizationTask) -> Result<(), TaskRunError> {
        Err(TaskRunError("upstream unreachable".into()))
    }
}

/// Runner that counts invocations.
#[derive(Default)]
struct CountingRunner {
    calls: AtomicUsize,
}

#[async_trait]
impl TaskRunner for CountingRunner {
    async fn run(&self, _task: &OptimizationTask) -> Result<(), TaskRunError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// STORAGE LEDGER
// ════════════════════════════════════════════════════════════════════════════════

#[test]
fn allocation_over_available_fails_without_partial_reservation() {
    let r = registry();
    let node = r.create_node(NodeType::Storage, 500, vec![]).expect("create");
    assert_eq!(node.available_storage, 400);

    let err = r
        .allocate_storage(AllocationRequest::new(&node.id, 401, "cache"))
        .expect_err("over capacity");
    assert_eq!(
        err,
        HarvestError::Capacity {
            node_id: node.id.clone(),
            requested: 401,
            available: 400,
        }
    );
    let after = r.get_node(&node.id).expect("node");
    assert_eq!(after.available_storage, 400);
    assert_eq!(after.used_storage, 100);
    assert_balanced(&r);
}

#[test]
fn allocate_then_deallocate_restores_available_exactly() {
    let r = registry();
    let node = r.create_node(NodeType::Compute, 3_000, vec![]).expect("create");
    let before = r.get_node(&node.id).expect("node").available_storage;

    let alloc = r
        .allocate_storage(
            AllocationRequest::new(&node.id, 1_234, "image-cache")
                .with_priority(Priority::High)
                .with_optimization("fp-abc"),
        )
        .expect("alloc");
    assert_eq!(alloc.optimization_id, "fp-abc");
    assert_eq!(
        r.get_node(&node.id).expect("node").available_storage,
        before - 1_234
    );
    assert_balanced(&r);

    assert!(r.deallocate_storage(&alloc.id));
    assert_eq!(r.get_node(&node.id).expect("node").available_storage, before);
    assert!(r.get_allocation(&alloc.id).is_none());
    assert_balanced(&r);
}

#[test]
fn deallocate_unknown_id_is_a_noop() {
    let r = registry();
    r.create_node(NodeType::Storage, 500, vec![]).expect("create");
    assert!(!r.deallocate_storage("alloc-does-not-exist"));
    assert_balanced(&r);
}

#[test]
fn allocate_on_unknown_node_is_not_found() {
    let r = registry();
    let err = r
        .allocate_storage(AllocationRequest::new("node-ghost", 1, "x"))
        .expect_err("unknown node");
    assert!(matches!(
        err,
        HarvestError::NotFound { kind: EntityKind::Node, .. }
    ));
}

#[test]
fn parallel_allocations_respect_capacity() {
    let r = Arc::new(registry());
    let node = r.create_node(NodeType::Storage, 1_100, vec![]).expect("create");
    assert_eq!(node.available_storage, 1_000);

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let r = Arc::clone(&r);
            let id = node.id.clone();
            std::thread::spawn(move || {
                (0..10)
                    .filter(|_| r.allocate_storage(AllocationRequest::new(&id, 10, "p")).is_ok())
                    .count()
            })
        })
        .collect();
    let granted: usize = handles.into_iter().map(|h| h.join().expect("join")).sum();

    assert_eq!(granted, 100);
    let after = r.get_node(&node.id).expect("node");
    assert_eq!(after.available_storage, 0);
    assert_balanced(&r);
}

// ════════════════════════════════════════════════════════════════════════════════
// SCALE & MERGE
// ════════════════════════════════════════════════════════════════════════════════

#[test]
fn scale_up_within_and_beyond_max() {
    let r = registry();
    let node = r.create_node(NodeType::Compute, 4_000, vec![]).expect("create");

    assert!(r.scale_up(&node.id, 1_000).expect("scale"));
    let grown = r.get_node(&node.id).expect("node");
    assert_eq!(grown.storage_capacity, 5_000);
    assert_eq!(grown.available_storage, 4_950);
    assert!((grown.compute_power - 60.0).abs() < 1e-9);

    assert!(!r.scale_up(&node.id, 1).expect("scale"));
    assert_eq!(r.get_node(&node.id).expect("node"), grown);
    assert_balanced(&r);
}

#[test]
fn merge_three_nodes_into_optimization_node() {
    let r = registry();
    let a = r
        .create_node(NodeType::Storage, 1_000, vec!["commercial".into()])
        .expect("a");
    let b = r
        .create_node(NodeType::Storage, 500, vec!["knowledge".into()])
        .expect("b");
    let c = r.create_node(NodeType::Storage, 500, vec![]).expect("c");

    let ids = vec![a.id.clone(), b.id.clone(), c.id.clone()];
    let merged = r.merge_nodes(&ids, NodeType::Optimization).expect("merge");

    assert_eq!(merged.storage_capacity, 2_000);
    assert_eq!(merged.node_type, NodeType::Optimization);
    assert_eq!(merged.status, NodeStatus::Active);
    assert_eq!(merged.tags, vec!["commercial".to_string()]);
    assert_eq!(merged.biome(), Some("commercial"));
    assert!((merged.compute_power - 30.0).abs() < 1e-9);
    assert!((merged.performance.efficiency - 75.0).abs() < 1e-9);

    for id in &ids {
        assert_eq!(r.get_node(id).expect("input").status, NodeStatus::Offline);
    }
    assert_eq!(r.node_count(), 4);
    assert_balanced(&r);
}

#[test]
fn merge_rejects_short_duplicate_unknown_and_offline_inputs() {
    let r = registry();
    let a = r.create_node(NodeType::Storage, 1_000, vec![]).expect("a");
    let b = r.create_node(NodeType::Storage, 1_000, vec![]).expect("b");

    assert!(matches!(
        r.merge_nodes(&[a.id.clone()], NodeType::Optimization),
        Err(HarvestError::Validation(_))
    ));
    assert!(matches!(
        r.merge_nodes(&[a.id.clone(), a.id.clone()], NodeType::Optimization),
        Err(HarvestError::Validation(_))
    ));
    assert!(matches!(
        r.merge_nodes(&[a.id.clone(), "node-ghost".into()], NodeType::Optimization),
        Err(HarvestError::NotFound { .. })
    ));

    r.merge_nodes(&[a.id.clone(), b.id.clone()], NodeType::Optimization)
        .expect("first merge");
    assert!(matches!(
        r.merge_nodes(&[a.id.clone(), b.id.clone()], NodeType::Optimization),
        Err(HarvestError::InvalidState(_))
    ));
    // Failed merges leave no extra node behind.
    assert_eq!(r.node_count(), 3);
}

// ════════════════════════════════════════════════════════════════════════════════
// TASKS
// ════════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn execute_task_applies_space_and_reward_formula() {
    let runner = Arc::new(CountingRunner::default());
    let r = NodeRegistry::with_runner(NodeTypeTable::default(), runner.clone());
    // storage: base 100, efficiency 75, reward rate 1.0
    let node = r.create_node(NodeType::Storage, 2_000, vec![]).expect("create");
    r.allocate_storage(AllocationRequest::new(&node.id, 900, "working-set"))
        .expect("alloc");

    let task = r
        .create_task(&node.id, TaskType::Compression, "https://shop.example")
        .expect("task");
    assert_eq!(task.status, TaskStatus::Pending);

    let done = r.execute_task(&task.id).await.expect("execute");
    assert_eq!(done.status, TaskStatus::Completed);
    // 400 * 0.75 * min(2, 1000/1000)
    assert!((done.space_saved - 300.0).abs() < 1e-9);
    assert!((done.reward - 0.3).abs() < 1e-9);
    assert!(done.started_at.is_some() && done.completed_at.is_some());
    assert_eq!(runner.calls.load(Ordering::SeqCst), 1);

    let n = r.get_node(&node.id).expect("node");
    assert_eq!(n.performance.tasks_completed, 1);
    assert!((n.performance.rewards_earned - 0.3).abs() < 1e-9);
    assert!((n.performance.efficiency - 76.0).abs() < 1e-9);

    let stats = r.node_stats(&node.id).expect("stats");
    assert_eq!(stats.completed_tasks, 1);
    assert_eq!(stats.active_tasks, 0);
    assert!((stats.total_space_processed - 300.0).abs() < 1e-9);
}

#[tokio::test]
async fn usage_factor_is_capped_at_two() {
    let r = registry();
    let node = r.create_node(NodeType::Storage, 10_000, vec![]).expect("create");
    r.allocate_storage(AllocationRequest::new(&node.id, 7_900, "bulk"))
        .expect("alloc");
    let task = r
        .create_task(&node.id, TaskType::Caching, "https://big.example")
        .expect("task");
    let done = r.execute_task(&task.id).await.expect("execute");
    // 150 * 0.75 * 2
    assert!((done.space_saved - 225.0).abs() < 1e-9);
}

#[tokio::test]
async fn runner_failure_is_captured_on_task() {
    let r = NodeRegistry::with_runner(NodeTypeTable::default(), Arc::new(FailingRunner));
    let node = r.create_node(NodeType::Storage, 1_000, vec![]).expect("create");
    let task = r
        .create_task(&node.id, TaskType::Minification, "https://down.example")
        .expect("task");

    let failed = r.execute_task(&task.id).await.expect("execute returns task");
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(
        failed.error.as_deref(),
        Some("task run failed: upstream unreachable")
    );
    let n = r.get_node(&node.id).expect("node");
    assert_eq!(n.performance.tasks_completed, 0);
    assert_eq!(r.node_stats(&node.id).expect("stats").failed_tasks, 1);
}

#[tokio::test]
async fn task_on_retired_node_fails_without_running() {
    let runner = Arc::new(CountingRunner::default());
    let r = NodeRegistry::with_runner(NodeTypeTable::default(), runner.clone());
    let node = r.create_node(NodeType::Storage, 1_000, vec![]).expect("create");
    let task = r
        .create_task(&node.id, TaskType::Deduplication, "https://x.example")
        .expect("task");
    r.retire_node(&node.id).expect("retire");

    assert!(matches!(
        r.create_task(&node.id, TaskType::Caching, "https://y.example"),
        Err(HarvestError::InvalidState(_))
    ));
    let failed = r.execute_task(&task.id).await.expect("execute");
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn spawned_tasks_complete_concurrently() {
    let r = Arc::new(registry());
    let node = r.create_node(NodeType::Optimization, 5_000, vec![]).expect("create");
    let handles: Vec<_> = (0..5)
        .map(|i| {
            let t = r
                .create_task(&node.id, TaskType::Caching, format!("https://site{}.example", i))
                .expect("task");
            r.spawn_task(t.id)
        })
        .collect();
    for h in handles {
        let task = h.await.expect("join").expect("execute");
        assert_eq!(task.status, TaskStatus::Completed);
    }
    let n = r.get_node(&node.id).expect("node");
    assert_eq!(n.performance.tasks_completed, 5);
    assert!((n.performance.efficiency - 85.0).abs() < 1e-9);
    assert_eq!(r.system_stats().completed_tasks, 5);
}

// ════════════════════════════════════════════════════════════════════════════════
// REBALANCE
// ════════════════════════════════════════════════════════════════════════════════

#[test]
fn rebalance_moves_oldest_low_priority_allocation_to_more_efficient_node() {
    let r = registry();
    // storage efficiency 75, optimization efficiency 80
    let slow = r.create_node(NodeType::Storage, 1_000, vec![]).expect("slow");
    let fast = r.create_node(NodeType::Optimization, 1_000, vec![]).expect("fast");

    let low = r
        .allocate_storage(AllocationRequest::new(&slow.id, 100, "archive").with_priority(Priority::Low))
        .expect("low");
    let high = r
        .allocate_storage(AllocationRequest::new(&slow.id, 100, "hot").with_priority(Priority::High))
        .expect("high");

    assert_eq!(r.rebalance(), 1);
    assert_eq!(r.get_allocation(&low.id).expect("low").node_id, fast.id);
    assert_eq!(r.get_allocation(&high.id).expect("high").node_id, slow.id);

    assert_eq!(r.get_node(&slow.id).expect("slow").used_storage, 200);
    assert_eq!(r.get_node(&fast.id).expect("fast").used_storage, 300);
    assert_balanced(&r);

    // Nothing left that qualifies.
    assert_eq!(r.rebalance(), 0);

    // Moved allocation still deallocates against its new node.
    assert!(r.deallocate_storage(&low.id));
    assert_eq!(r.get_node(&fast.id).expect("fast").used_storage, 200);
    assert_balanced(&r);
}

#[test]
fn rebalance_skips_allocations_that_do_not_fit() {
    let r = registry();
    let slow = r.create_node(NodeType::Storage, 2_000, vec![]).expect("slow");
    // optimization base 200, capacity 300 → 100 available
    let fast = r.create_node(NodeType::Optimization, 300, vec![]).expect("fast");
    r.allocate_storage(AllocationRequest::new(&slow.id, 500, "bulk").with_priority(Priority::Low))
        .expect("alloc");

    assert_eq!(r.rebalance(), 0);
    assert_eq!(r.get_node(&fast.id).expect("fast").used_storage, 200);
    assert_balanced(&r);
}
