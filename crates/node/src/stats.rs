//! Read-only aggregate queries over the registry.
//!
//! Storage and reward aggregates in [`SystemStats`] cover active nodes
//! only; offline nodes are retained for audit and would otherwise be
//! double counted after a merge. Task aggregates cover every task.

use serde::Serialize;

use harvest_common::{EntityKind, HarvestError, NodeStatus, Result};

use crate::model::TaskStatus;
use crate::registry::NodeRegistry;

/// Per-node statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeStats {
    pub node_id: String,
    pub status: NodeStatus,
    pub allocation_count: usize,
    pub allocated_storage: u64,
    /// Pending or processing tasks.
    pub active_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub total_space_processed: f64,
    pub total_reward: f64,
}

/// System-wide statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemStats {
    pub total_nodes: usize,
    pub active_nodes: usize,
    pub offline_nodes: usize,
    pub total_capacity: u64,
    pub used_storage: u64,
    pub available_storage: u64,
    pub total_compute_power: f64,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub total_space_processed: f64,
    pub total_rewards: f64,
    /// `used / capacity * 100`, or `0` when there is no capacity.
    pub storage_utilization: f64,
    /// `Σ(used * reward_rate) / 1000` over active nodes.
    pub daily_reward_estimate: f64,
}

impl NodeRegistry {
    /// Statistics for a single node.
    pub fn node_stats(&self, node_id: &str) -> Result<NodeStats> {
        let node = self
            .get_node(node_id)
            .ok_or_else(|| HarvestError::not_found(EntityKind::Node, node_id))?;

        let (allocation_count, allocated_storage) = self
            .allocations
            .read()
            .values()
            .filter(|a| a.node_id == node_id)
            .fold((0usize, 0u64), |(c, s), a| (c + 1, s.saturating_add(a.amount)));

        let tasks = self.tasks.read();
        let mut stats = NodeStats {
            node_id: node.id,
            status: node.status,
            allocation_count,
            allocated_storage,
            active_tasks: 0,
            completed_tasks: 0,
            failed_tasks: 0,
            total_space_processed: 0.0,
            total_reward: 0.0,
        };
        for task in tasks.values().filter(|t| t.node_id == node_id) {
            match task.status {
                TaskStatus::Pending | TaskStatus::Processing => stats.active_tasks += 1,
                TaskStatus::Completed => {
                    stats.completed_tasks += 1;
                    stats.total_space_processed += task.space_saved;
                    stats.total_reward += task.reward;
                }
                TaskStatus::Failed => stats.failed_tasks += 1,
            }
        }
        Ok(stats)
    }

    /// Aggregate statistics across the registry.
    pub fn system_stats(&self) -> SystemStats {
        let nodes = self.list_nodes();
        let mut stats = SystemStats {
            total_nodes: nodes.len(),
            active_nodes: 0,
            offline_nodes: 0,
            total_capacity: 0,
            used_storage: 0,
            available_storage: 0,
            total_compute_power: 0.0,
            total_tasks: 0,
            completed_tasks: 0,
            failed_tasks: 0,
            total_space_processed: 0.0,
            total_rewards: 0.0,
            storage_utilization: 0.0,
            daily_reward_estimate: 0.0,
        };

        for node in &nodes {
            match node.status {
                NodeStatus::Offline => stats.offline_nodes += 1,
                NodeStatus::Active => {
                    stats.active_nodes += 1;
                    stats.total_capacity += node.storage_capacity;
                    stats.used_storage += node.used_storage;
                    stats.available_storage += node.available_storage;
                    stats.total_compute_power += node.compute_power;
                    stats.total_rewards += node.performance.rewards_earned;
                    if let Ok(spec) = self.node_types.spec(node.node_type) {
                        stats.daily_reward_estimate +=
                            node.used_storage as f64 * spec.reward_rate / 1000.0;
                    }
                }
            }
        }
        if stats.total_capacity > 0 {
            stats.storage_utilization =
                stats.used_storage as f64 / stats.total_capacity as f64 * 100.0;
        }

        let tasks = self.tasks.read();
        stats.total_tasks = tasks.len();
        for task in tasks.values() {
            match task.status {
                TaskStatus::Completed => {
                    stats.completed_tasks += 1;
                    stats.total_space_processed += task.space_saved;
                }
                TaskStatus::Failed => stats.failed_tasks += 1,
                _ => {}
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use harvest_common::{NodeType, NodeTypeTable};

    use crate::model::AllocationRequest;
    use crate::registry::NodeRegistry;

    #[test]
    fn test_empty_registry_stats() {
        let r = NodeRegistry::new(NodeTypeTable::default());
        let s = r.system_stats();
        assert_eq!(s.total_nodes, 0);
        assert_eq!(s.storage_utilization, 0.0);
        assert_eq!(s.daily_reward_estimate, 0.0);
    }

    #[test]
    fn test_utilization_and_daily_estimate() {
        let r = NodeRegistry::new(NodeTypeTable::default());
        // storage: base 100, reward_rate 1.0
        let a = r.create_node(NodeType::Storage, 1_000, vec![]).expect("a");
        // compute: base 50, reward_rate 1.5
        r.create_node(NodeType::Compute, 1_000, vec![]).expect("b");
        r.allocate_storage(AllocationRequest::new(&a.id, 400, "cache"))
            .expect("alloc");

        let s = r.system_stats();
        assert_eq!(s.active_nodes, 2);
        assert_eq!(s.total_capacity, 2_000);
        assert_eq!(s.used_storage, 550);
        assert!((s.storage_utilization - 27.5).abs() < 1e-9);
        // (500 * 1.0 + 50 * 1.5) / 1000
        assert!((s.daily_reward_estimate - 0.575).abs() < 1e-9);

        let ns = r.node_stats(&a.id).expect("stats");
        assert_eq!(ns.allocation_count, 1);
        assert_eq!(ns.allocated_storage, 400);
    }

    #[test]
    fn test_offline_nodes_excluded_from_storage_totals() {
        let r = NodeRegistry::new(NodeTypeTable::default());
        let a = r.create_node(NodeType::Storage, 1_000, vec![]).expect("a");
        r.create_node(NodeType::Storage, 500, vec![]).expect("b");
        r.retire_node(&a.id).expect("retire");
        let s = r.system_stats();
        assert_eq!(s.total_nodes, 2);
        assert_eq!(s.offline_nodes, 1);
        assert_eq!(s.total_capacity, 500);
    }
}
