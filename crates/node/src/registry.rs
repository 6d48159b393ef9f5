//! # Node Registry
//!
//! Owns node lifecycle, the per-node storage allocation ledger, and
//! optimization task execution.
//!
//! ## Lifecycle
//!
//! ```text
//! create_node ──▶ Active ──┬── allocate / deallocate / scale_up / tasks
//!                          │
//!                          ├── merge_nodes ──▶ Offline (inputs; retained)
//!                          └── retire_node ──▶ Offline (retained)
//! ```
//!
//! Nodes are never removed from the registry.
//!
//! ## Concurrency Model
//!
//! Each node lives behind its own `parking_lot::Mutex`; the id → node map
//! is an `RwLock`. Storage counters are only mutated while the node's
//! mutex is held, which preserves `used + available == capacity` under
//! parallel callers. Lock order is always node(s) before the allocation or
//! task maps; when several nodes are locked at once they are locked in
//! ascending id order. No lock is held across `.await`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use harvest_common::{
    new_id, now_ms, EntityKind, HarvestError, NodeStatus, NodeType, NodeTypeSpec, NodeTypeTable,
    Result,
};

use crate::model::{
    AllocationRequest, Node, NodePerformance, OptimizationTask, StorageAllocation, TaskStatus,
    TaskType,
};
use crate::runner::{InstantRunner, TaskRunner};

// ════════════════════════════════════════════════════════════════════════════
// REGISTRY
// ════════════════════════════════════════════════════════════════════════════

/// Registry of nodes, storage allocations and optimization tasks.
pub struct NodeRegistry {
    pub(crate) node_types: NodeTypeTable,
    pub(crate) nodes: RwLock<HashMap<String, Arc<Mutex<Node>>>>,
    pub(crate) allocations: RwLock<HashMap<String, StorageAllocation>>,
    pub(crate) tasks: RwLock<HashMap<String, OptimizationTask>>,
    runner: Arc<dyn TaskRunner>,
}

impl NodeRegistry {
    /// Create an empty registry whose tasks complete immediately.
    pub fn new(node_types: NodeTypeTable) -> Self {
        Self::with_runner(node_types, Arc::new(InstantRunner))
    }

    /// Create an empty registry that delegates task work to `runner`.
    pub fn with_runner(node_types: NodeTypeTable, runner: Arc<dyn TaskRunner>) -> Self {
        Self {
            node_types,
            nodes: RwLock::new(HashMap::new()),
            allocations: RwLock::new(HashMap::new()),
            tasks: RwLock::new(HashMap::new()),
            runner,
        }
    }

    pub(crate) fn node_handle(&self, node_id: &str) -> Result<Arc<Mutex<Node>>> {
        self.nodes
            .read()
            .get(node_id)
            .cloned()
            .ok_or_else(|| HarvestError::not_found(EntityKind::Node, node_id))
    }

    fn build_node(
        node_type: NodeType,
        spec: &NodeTypeSpec,
        requested_capacity: u64,
        tags: Vec<String>,
        now: u64,
    ) -> Node {
        // Capacity never drops below the base reservation.
        let capacity = requested_capacity
            .min(spec.max_storage)
            .max(spec.base_storage);
        Node {
            id: new_id("node"),
            node_type,
            status: NodeStatus::Active,
            storage_capacity: capacity,
            used_storage: spec.base_storage,
            available_storage: capacity - spec.base_storage,
            compute_power: spec.compute_power,
            performance: NodePerformance {
                uptime_secs: 0,
                efficiency: spec.initial_efficiency,
                tasks_completed: 0,
                rewards_earned: 0.0,
            },
            created_at: now,
            last_activity: now,
            tags,
            source_events: Vec::new(),
        }
    }

    fn insert_node(&self, node: Node) {
        self.nodes
            .write()
            .insert(node.id.clone(), Arc::new(Mutex::new(node)));
    }

    // ────────────────────────────────────────────────────────────────────────
    // Node lifecycle
    // ────────────────────────────────────────────────────────────────────────

    /// Create a node of `node_type`.
    ///
    /// `requested_capacity` is clamped to the type's maximum and the type's
    /// base storage is pre-reserved as used, so `available = capacity - base`.
    /// Fails only with [`HarvestError::UnknownNodeType`].
    pub fn create_node(
        &self,
        node_type: NodeType,
        requested_capacity: u64,
        tags: Vec<String>,
    ) -> Result<Node> {
        let spec = self.node_types.spec(node_type)?;
        let node = Self::build_node(node_type, spec, requested_capacity, tags, now_ms());
        if node.storage_capacity != requested_capacity {
            debug!(
                "node capacity clamped from {} to {} for type {}",
                requested_capacity, node.storage_capacity, node_type
            );
        }
        info!(
            "created {} node {} (capacity {}, available {})",
            node_type, node.id, node.storage_capacity, node.available_storage
        );
        self.insert_node(node.clone());
        Ok(node)
    }

    /// Grow a node's capacity by `additional`.
    ///
    /// Returns `Ok(false)` without mutation if the new total would exceed
    /// the type's maximum. Compute power grows by `additional / 100`.
    pub fn scale_up(&self, node_id: &str, additional: u64) -> Result<bool> {
        let handle = self.node_handle(node_id)?;
        let mut node = handle.lock();
        if !node.is_active() {
            return Err(HarvestError::InvalidState(format!(
                "cannot scale offline node {}",
                node_id
            )));
        }
        let spec = self.node_types.spec(node.node_type)?;
        let within_max = node
            .storage_capacity
            .checked_add(additional)
            .is_some_and(|total| total <= spec.max_storage);
        if !within_max {
            debug!(
                "scale_up rejected for {}: {} + {} exceeds max {}",
                node_id, node.storage_capacity, additional, spec.max_storage
            );
            return Ok(false);
        }
        node.grow(additional);
        node.compute_power += additional as f64 / 100.0;
        node.touch(now_ms());
        info!(
            "scaled node {} by {} to capacity {}",
            node_id, additional, node.storage_capacity
        );
        Ok(true)
    }

    /// Merge two or more active nodes into a new node of `new_type`.
    ///
    /// The new node's capacity is the sum of the inputs' capacities
    /// (clamped to the type maximum), it takes the first input's tags,
    /// sums compute power, rewards and completed tasks, and averages
    /// efficiency. Every input transitions to `Offline` and is retained.
    pub fn merge_nodes(&self, node_ids: &[String], new_type: NodeType) -> Result<Node> {
        if node_ids.len() < 2 {
            return Err(HarvestError::Validation(format!(
                "merge requires at least 2 nodes, got {}",
                node_ids.len()
            )));
        }
        let mut seen = HashSet::new();
        for id in node_ids {
            if !seen.insert(id.as_str()) {
                return Err(HarvestError::Validation(format!(
                    "duplicate node id in merge: {}",
                    id
                )));
            }
        }
        let spec = self.node_types.spec(new_type)?;

        let mut handles: Vec<(String, Arc<Mutex<Node>>)> = node_ids
            .iter()
            .map(|id| self.node_handle(id).map(|h| (id.clone(), h)))
            .collect::<Result<_>>()?;
        handles.sort_by(|a, b| a.0.cmp(&b.0));
        let mut guards: Vec<MutexGuard<'_, Node>> = handles.iter().map(|(_, h)| h.lock()).collect();

        if let Some(offline) = guards.iter().find(|g| !g.is_active()) {
            return Err(HarvestError::InvalidState(format!(
                "node {} is offline and cannot be merged",
                offline.id
            )));
        }

        let first = guards.iter().find(|g| g.id == node_ids[0]);
        let biome = first.and_then(|g| g.biome()).map(str::to_string);
        let tags = first.map(|g| g.tags.clone()).unwrap_or_default();
        let total_capacity = guards
            .iter()
            .fold(0u64, |acc, g| acc.saturating_add(g.storage_capacity));
        let total_compute: f64 = guards.iter().map(|g| g.compute_power).sum();
        let total_rewards: f64 = guards.iter().map(|g| g.performance.rewards_earned).sum();
        let total_tasks: u64 = guards.iter().map(|g| g.performance.tasks_completed).sum();
        let avg_efficiency =
            guards.iter().map(|g| g.performance.efficiency).sum::<f64>() / guards.len() as f64;
        let source_events: Vec<String> = guards
            .iter()
            .flat_map(|g| g.source_events.iter().cloned())
            .collect();

        let now = now_ms();
        let mut merged = Self::build_node(new_type, spec, total_capacity, tags, now);
        if merged.storage_capacity < total_capacity {
            warn!(
                "merged capacity {} clamped to {} max {}",
                total_capacity, new_type, merged.storage_capacity
            );
        }
        merged.compute_power = total_compute;
        merged.performance.rewards_earned = total_rewards;
        merged.performance.tasks_completed = total_tasks;
        merged.performance.efficiency = avg_efficiency.clamp(0.0, 100.0);
        merged.source_events = source_events;

        for guard in guards.iter_mut() {
            guard.status = NodeStatus::Offline;
            guard.touch(now);
        }
        drop(guards);

        info!(
            "merged {} nodes into {} node {} (capacity {}, biome {})",
            node_ids.len(),
            new_type,
            merged.id,
            merged.storage_capacity,
            biome.as_deref().unwrap_or("none")
        );
        self.insert_node(merged.clone());
        Ok(merged)
    }

    /// Take an active node offline. The node and its history are retained.
    pub fn retire_node(&self, node_id: &str) -> Result<Node> {
        let handle = self.node_handle(node_id)?;
        let mut node = handle.lock();
        if !node.is_active() {
            return Err(HarvestError::InvalidState(format!(
                "node {} is already offline",
                node_id
            )));
        }
        node.status = NodeStatus::Offline;
        node.touch(now_ms());
        info!("retired node {}", node_id);
        Ok(node.clone())
    }

    /// Record that an optimization event contributed to this node.
    pub fn attach_source_event(&self, node_id: &str, fingerprint: &str) -> Result<()> {
        let handle = self.node_handle(node_id)?;
        let mut node = handle.lock();
        if !node.source_events.iter().any(|f| f == fingerprint) {
            node.source_events.push(fingerprint.to_string());
        }
        Ok(())
    }

    // ────────────────────────────────────────────────────────────────────────
    // Storage ledger
    // ────────────────────────────────────────────────────────────────────────

    /// Reserve storage on a node.
    ///
    /// ## Errors
    ///
    /// - [`HarvestError::Validation`] if the amount is zero.
    /// - [`HarvestError::NotFound`] if the node is unknown.
    /// - [`HarvestError::InvalidState`] if the node is offline.
    /// - [`HarvestError::Capacity`] if the amount exceeds available storage.
    ///   Nothing is reserved in that case.
    pub fn allocate_storage(&self, request: AllocationRequest) -> Result<StorageAllocation> {
        if request.amount == 0 {
            return Err(HarvestError::Validation("allocation amount must be > 0".into()));
        }
        let handle = self.node_handle(&request.node_id)?;
        let mut node = handle.lock();
        if !node.is_active() {
            return Err(HarvestError::InvalidState(format!(
                "cannot allocate on offline node {}",
                request.node_id
            )));
        }
        node.reserve(request.amount)?;
        let now = now_ms();
        node.touch(now);

        let allocation = StorageAllocation {
            id: new_id("alloc"),
            node_id: request.node_id,
            optimization_id: request.optimization_id,
            amount: request.amount,
            purpose: request.purpose,
            priority: request.priority,
            created_at: now,
            expires_at: request.expires_at,
        };
        self.allocations
            .write()
            .insert(allocation.id.clone(), allocation.clone());
        debug!(
            "allocated {} on {} ({}), available now {}",
            allocation.amount, allocation.node_id, allocation.purpose, node.available_storage
        );
        Ok(allocation)
    }

    /// Release an allocation and restore the owning node's storage.
    ///
    /// Returns `false` (not an error) if the allocation id is unknown.
    pub fn deallocate_storage(&self, allocation_id: &str) -> bool {
        let Some(allocation) = self.allocations.write().remove(allocation_id) else {
            debug!("deallocate ignored for unknown allocation {}", allocation_id);
            return false;
        };
        match self.node_handle(&allocation.node_id) {
            Ok(handle) => {
                let mut node = handle.lock();
                node.release(allocation.amount);
                node.touch(now_ms());
            }
            Err(e) => warn!("allocation {} referenced missing node: {}", allocation_id, e),
        }
        debug!("deallocated {} from {}", allocation.amount, allocation.node_id);
        true
    }

    /// Deallocate every allocation whose expiry is at or before `now_ms`.
    ///
    /// Returns the number of allocations released.
    pub fn expire_allocations(&self, now_ms: u64) -> usize {
        let expired: Vec<String> = self
            .allocations
            .read()
            .values()
            .filter(|a| a.is_expired(now_ms))
            .map(|a| a.id.clone())
            .collect();
        let released = expired
            .iter()
            .filter(|id| self.deallocate_storage(id))
            .count();
        if released > 0 {
            info!("expired {} storage allocations", released);
        }
        released
    }

    // ────────────────────────────────────────────────────────────────────────
    // Tasks
    // ────────────────────────────────────────────────────────────────────────

    /// Create a pending task on an active node.
    pub fn create_task(
        &self,
        node_id: &str,
        task_type: TaskType,
        target: impl Into<String>,
    ) -> Result<OptimizationTask> {
        let handle = self.node_handle(node_id)?;
        if !handle.lock().is_active() {
            return Err(HarvestError::InvalidState(format!(
                "cannot create task on offline node {}",
                node_id
            )));
        }
        let task = OptimizationTask {
            id: new_id("task"),
            node_id: node_id.to_string(),
            task_type,
            target: target.into(),
            status: TaskStatus::Pending,
            space_saved: 0.0,
            reward: 0.0,
            error: None,
            created_at: now_ms(),
            started_at: None,
            completed_at: None,
        };
        self.tasks.write().insert(task.id.clone(), task.clone());
        debug!("created {:?} task {} on {}", task_type, task.id, node_id);
        Ok(task)
    }

    /// Execute a pending task.
    ///
    /// The task moves to `processing` before the runner is awaited. On
    /// success the space saved and reward are computed from the node's
    /// current efficiency, usage and reward rate; the node's counters are
    /// updated and the task becomes `completed`. On failure the task
    /// becomes `failed` with the error recorded. Either way the final task
    /// is returned; only an unknown id or a non-pending task is an `Err`.
    pub async fn execute_task(&self, task_id: &str) -> Result<OptimizationTask> {
        let task = {
            let mut tasks = self.tasks.write();
            let task = tasks
                .get_mut(task_id)
                .ok_or_else(|| HarvestError::not_found(EntityKind::Task, task_id))?;
            if task.status != TaskStatus::Pending {
                return Err(HarvestError::InvalidState(format!(
                    "task {} is {:?}, expected pending",
                    task_id, task.status
                )));
            }
            task.status = TaskStatus::Processing;
            task.started_at = Some(now_ms());
            task.clone()
        };

        let outcome = match self.ensure_runnable(&task) {
            Ok(()) => self.runner.run(&task).await.map_err(|e| e.to_string()),
            Err(reason) => Err(reason),
        };
        let settled = outcome.and_then(|()| self.settle(&task));

        let mut tasks = self.tasks.write();
        let entry = tasks
            .get_mut(task_id)
            .ok_or_else(|| HarvestError::not_found(EntityKind::Task, task_id))?;
        entry.completed_at = Some(now_ms());
        match settled {
            Ok((space_saved, reward)) => {
                entry.status = TaskStatus::Completed;
                entry.space_saved = space_saved;
                entry.reward = reward;
                info!(
                    "task {} completed on {}: saved {:.2}, reward {:.4}",
                    task_id, entry.node_id, space_saved, reward
                );
            }
            Err(reason) => {
                entry.status = TaskStatus::Failed;
                warn!("task {} failed on {}: {}", task_id, entry.node_id, reason);
                entry.error = Some(reason);
            }
        }
        Ok(entry.clone())
    }

    /// Run [`execute_task`](Self::execute_task) on the tokio runtime.
    pub fn spawn_task(self: &Arc<Self>, task_id: impl Into<String>) -> JoinHandle<Result<OptimizationTask>> {
        let registry = Arc::clone(self);
        let task_id = task_id.into();
        tokio::spawn(async move { registry.execute_task(&task_id).await })
    }

    fn ensure_runnable(&self, task: &OptimizationTask) -> std::result::Result<(), String> {
        let handle = self.node_handle(&task.node_id).map_err(|e| e.to_string())?;
        let node = handle.lock();
        if node.is_active() {
            Ok(())
        } else {
            Err(format!("node {} is offline", node.id))
        }
    }

    /// Book a successful run against the node and return `(space_saved, reward)`.
    fn settle(&self, task: &OptimizationTask) -> std::result::Result<(f64, f64), String> {
        let handle = self.node_handle(&task.node_id).map_err(|e| e.to_string())?;
        let mut node = handle.lock();
        if !node.is_active() {
            return Err(format!("node {} went offline during execution", node.id));
        }
        let spec = self
            .node_types
            .spec(node.node_type)
            .map_err(|e| e.to_string())?;

        let usage_factor = (node.used_storage as f64 / 1000.0).min(2.0);
        let space_saved =
            task.task_type.base_rate() * (node.performance.efficiency / 100.0) * usage_factor;
        let reward = space_saved * spec.reward_rate / 1000.0;

        node.performance.tasks_completed += 1;
        node.performance.rewards_earned += reward;
        node.performance.efficiency = (node.performance.efficiency + 1.0).min(100.0);
        node.touch(now_ms());
        Ok((space_saved, reward))
    }

    // ────────────────────────────────────────────────────────────────────────
    // Lookups
    // ────────────────────────────────────────────────────────────────────────

    pub fn get_node(&self, node_id: &str) -> Option<Node> {
        self.node_handle(node_id).ok().map(|h| h.lock().clone())
    }

    /// Snapshot of every node, oldest first.
    pub fn list_nodes(&self) -> Vec<Node> {
        let handles: Vec<Arc<Mutex<Node>>> = self.nodes.read().values().cloned().collect();
        let mut nodes: Vec<Node> = handles.iter().map(|h| h.lock().clone()).collect();
        nodes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn get_allocation(&self, allocation_id: &str) -> Option<StorageAllocation> {
        self.allocations.read().get(allocation_id).cloned()
    }

    /// Allocations currently held on `node_id`, oldest first.
    pub fn allocations_for(&self, node_id: &str) -> Vec<StorageAllocation> {
        let mut out: Vec<StorageAllocation> = self
            .allocations
            .read()
            .values()
            .filter(|a| a.node_id == node_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        out
    }

    pub fn get_task(&self, task_id: &str) -> Option<OptimizationTask> {
        self.tasks.read().get(task_id).cloned()
    }

    /// Tasks, optionally filtered by node, oldest first.
    pub fn list_tasks(&self, node_id: Option<&str>) -> Vec<OptimizationTask> {
        let mut out: Vec<OptimizationTask> = self
            .tasks
            .read()
            .values()
            .filter(|t| node_id.map_or(true, |id| t.node_id == id))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        out
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("nodes", &self.nodes.read().len())
            .field("allocations", &self.allocations.read().len())
            .field("tasks", &self.tasks.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_common::Priority;

    fn registry() -> NodeRegistry {
        NodeRegistry::new(NodeTypeTable::default())
    }

    #[test]
    fn test_create_node_clamps_and_reserves_base() {
        let r = registry();
        let n = r
            .create_node(NodeType::Storage, 1_000_000, vec!["professional".into()])
            .expect("create");
        assert_eq!(n.storage_capacity, 10_000);
        assert_eq!(n.used_storage, 100);
        assert_eq!(n.available_storage, 9_900);
        assert!(n.storage_balanced());
    }

    #[test]
    fn test_create_node_below_base_keeps_invariant() {
        let r = registry();
        let n = r.create_node(NodeType::Archive, 10, vec![]).expect("create");
        assert_eq!(n.storage_capacity, 500);
        assert_eq!(n.available_storage, 0);
        assert!(n.storage_balanced());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let mut specs = std::collections::BTreeMap::new();
        specs.insert(
            NodeType::Storage,
            NodeTypeTable::default()
                .spec(NodeType::Storage)
                .expect("spec")
                .clone(),
        );
        let r = NodeRegistry::new(NodeTypeTable::new(specs));
        let err = r
            .create_node(NodeType::Compute, 100, vec![])
            .expect_err("compute not configured");
        assert_eq!(err, HarvestError::UnknownNodeType("compute".into()));
    }

    #[test]
    fn test_allocate_on_offline_node_is_invalid_state() {
        let r = registry();
        let n = r.create_node(NodeType::Storage, 500, vec![]).expect("create");
        r.retire_node(&n.id).expect("retire");
        let err = r
            .allocate_storage(AllocationRequest::new(&n.id, 10, "cache"))
            .expect_err("offline");
        assert!(matches!(err, HarvestError::InvalidState(_)));
    }

    #[test]
    fn test_zero_allocation_rejected() {
        let r = registry();
        let n = r.create_node(NodeType::Storage, 500, vec![]).expect("create");
        let err = r
            .allocate_storage(AllocationRequest::new(&n.id, 0, "cache"))
            .expect_err("zero");
        assert!(matches!(err, HarvestError::Validation(_)));
    }

    #[test]
    fn test_expire_allocations_releases_storage() {
        let r = registry();
        let n = r.create_node(NodeType::Storage, 1_000, vec![]).expect("create");
        r.allocate_storage(
            AllocationRequest::new(&n.id, 200, "temp")
                .with_priority(Priority::Low)
                .expires_at(5_000),
        )
        .expect("alloc");
        r.allocate_storage(AllocationRequest::new(&n.id, 100, "keep"))
            .expect("alloc");
        assert_eq!(r.expire_allocations(4_999), 0);
        assert_eq!(r.expire_allocations(5_000), 1);
        let node = r.get_node(&n.id).expect("node");
        assert_eq!(node.used_storage, 200);
        assert_eq!(node.available_storage, 800);
        assert_eq!(r.allocations_for(&n.id).len(), 1);
    }

    #[test]
    fn test_scale_up_offline_is_invalid_state() {
        let r = registry();
        let n = r.create_node(NodeType::Storage, 500, vec![]).expect("create");
        r.retire_node(&n.id).expect("retire");
        assert!(matches!(
            r.scale_up(&n.id, 10),
            Err(HarvestError::InvalidState(_))
        ));
        assert!(matches!(
            r.retire_node(&n.id),
            Err(HarvestError::InvalidState(_))
        ));
    }

    #[test]
    fn test_attach_source_event_is_idempotent() {
        let r = registry();
        let n = r.create_node(NodeType::Storage, 500, vec![]).expect("create");
        r.attach_source_event(&n.id, "fp-1").expect("attach");
        r.attach_source_event(&n.id, "fp-1").expect("attach");
        assert_eq!(r.get_node(&n.id).expect("node").source_events, vec!["fp-1"]);
    }

    #[tokio::test]
    async fn test_execute_non_pending_task_rejected() {
        let r = registry();
        let n = r.create_node(NodeType::Storage, 2_000, vec![]).expect("create");
        let t = r.create_task(&n.id, TaskType::Caching, "https://a.example").expect("task");
        r.execute_task(&t.id).await.expect("first run");
        let err = r.execute_task(&t.id).await.expect_err("already completed");
        assert!(matches!(err, HarvestError::InvalidState(_)));
        assert!(matches!(
            r.execute_task("task-missing").await,
            Err(HarvestError::NotFound { kind: EntityKind::Task, .. })
        ));
    }
}
