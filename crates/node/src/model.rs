//! # Registry Entities
//!
//! Plain data types owned by the [`NodeRegistry`](crate::NodeRegistry):
//! [`Node`], [`StorageAllocation`] and [`OptimizationTask`].
//!
//! ## Storage Invariant
//!
//! For every node at every observable point:
//!
//! ```text
//! used_storage + available_storage == storage_capacity
//! storage_capacity <= max_storage(node_type)
//! ```
//!
//! The only code paths that touch the counters are [`Node::reserve`],
//! [`Node::release`] and [`Node::grow`], each of which preserves the
//! equation.

use serde::{Deserialize, Serialize};

use harvest_common::{HarvestError, NodeStatus, NodeType, Priority, Result};

// ════════════════════════════════════════════════════════════════════════════
// NODE
// ════════════════════════════════════════════════════════════════════════════

/// Performance counters reported for a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodePerformance {
    /// Seconds between creation and the last recorded activity.
    pub uptime_secs: u64,
    /// 0-100, nudged up by one per completed task.
    pub efficiency: f64,
    pub tasks_completed: u64,
    pub rewards_earned: f64,
}

/// A unit of virtual compute/storage capacity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub node_type: NodeType,
    pub status: NodeStatus,
    pub storage_capacity: u64,
    pub used_storage: u64,
    pub available_storage: u64,
    pub compute_power: f64,
    pub performance: NodePerformance,
    pub created_at: u64,
    pub last_activity: u64,
    /// Free-form tags. The first tag is the node's biome.
    pub tags: Vec<String>,
    /// Fingerprints of optimization events that contributed capacity.
    pub source_events: Vec<String>,
}

impl Node {
    pub fn is_active(&self) -> bool {
        self.status == NodeStatus::Active
    }

    /// First tag, used as the node's biome/category.
    pub fn biome(&self) -> Option<&str> {
        self.tags.first().map(String::as_str)
    }

    /// Returns `true` if the storage counters are consistent.
    pub fn storage_balanced(&self) -> bool {
        self.used_storage.checked_add(self.available_storage) == Some(self.storage_capacity)
    }

    /// Move `amount` from available to used.
    ///
    /// Fails with [`HarvestError::Capacity`] and leaves the node untouched
    /// when `amount` exceeds the available storage.
    pub(crate) fn reserve(&mut self, amount: u64) -> Result<()> {
        if amount > self.available_storage {
            return Err(HarvestError::Capacity {
                node_id: self.id.clone(),
                requested: amount,
                available: self.available_storage,
            });
        }
        self.used_storage += amount;
        self.available_storage -= amount;
        Ok(())
    }

    /// Move `amount` from used back to available.
    ///
    /// Clamped to the current used storage so the invariant cannot break.
    pub(crate) fn release(&mut self, amount: u64) {
        let amount = amount.min(self.used_storage);
        self.used_storage -= amount;
        self.available_storage += amount;
    }

    /// Grow capacity (and available storage) by `amount`.
    pub(crate) fn grow(&mut self, amount: u64) {
        self.storage_capacity += amount;
        self.available_storage += amount;
    }

    pub(crate) fn touch(&mut self, now_ms: u64) {
        self.last_activity = now_ms.max(self.last_activity);
        self.performance.uptime_secs =
            harvest_common::time::elapsed_secs(self.created_at, self.last_activity);
    }
}

// ════════════════════════════════════════════════════════════════════════════
// STORAGE ALLOCATION
// ════════════════════════════════════════════════════════════════════════════

/// A named, amount-bounded claim against a node's available storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageAllocation {
    pub id: String,
    pub node_id: String,
    /// Optimization event (or other origin) this storage serves.
    pub optimization_id: String,
    pub amount: u64,
    pub purpose: String,
    pub priority: Priority,
    pub created_at: u64,
    pub expires_at: Option<u64>,
}

impl StorageAllocation {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at.is_some_and(|t| now_ms >= t)
    }
}

/// Parameters for [`NodeRegistry::allocate_storage`](crate::NodeRegistry::allocate_storage).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationRequest {
    pub node_id: String,
    pub amount: u64,
    pub purpose: String,
    pub priority: Priority,
    pub optimization_id: String,
    pub expires_at: Option<u64>,
}

impl AllocationRequest {
    pub fn new(node_id: impl Into<String>, amount: u64, purpose: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            amount,
            purpose: purpose.into(),
            priority: Priority::Medium,
            optimization_id: String::new(),
            expires_at: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_optimization(mut self, optimization_id: impl Into<String>) -> Self {
        self.optimization_id = optimization_id.into();
        self
    }

    pub fn expires_at(mut self, at_ms: u64) -> Self {
        self.expires_at = Some(at_ms);
        self
    }
}

// ════════════════════════════════════════════════════════════════════════════
// OPTIMIZATION TASK
// ════════════════════════════════════════════════════════════════════════════

/// Kind of optimization work a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Compression,
    Minification,
    Caching,
    Deduplication,
}

impl TaskType {
    /// Space units saved per execution at 100% efficiency and 1000 used.
    pub fn base_rate(&self) -> f64 {
        match self {
            Self::Compression => 400.0,
            Self::Minification => 250.0,
            Self::Caching => 150.0,
            Self::Deduplication => 600.0,
        }
    }
}

/// Task lifecycle: `pending → processing → completed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Pending or processing.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }
}

/// A unit of work executed against a node's compute budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationTask {
    pub id: String,
    pub node_id: String,
    pub task_type: TaskType,
    pub target: String,
    pub status: TaskStatus,
    pub space_saved: f64,
    pub reward: f64,
    pub error: Option<String>,
    pub created_at: u64,
    pub started_at: Option<u64>,
    pub completed_at: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(capacity: u64, used: u64) -> Node {
        Node {
            id: "node-t".into(),
            node_type: NodeType::Storage,
            status: NodeStatus::Active,
            storage_capacity: capacity,
            used_storage: used,
            available_storage: capacity - used,
            compute_power: 1.0,
            performance: NodePerformance {
                uptime_secs: 0,
                efficiency: 75.0,
                tasks_completed: 0,
                rewards_earned: 0.0,
            },
            created_at: 1_000,
            last_activity: 1_000,
            tags: vec!["knowledge".into()],
            source_events: Vec::new(),
        }
    }

    #[test]
    fn test_reserve_rejects_without_partial_mutation() {
        let mut n = node(500, 100);
        let err = n.reserve(401).expect_err("over capacity");
        assert!(matches!(err, HarvestError::Capacity { requested: 401, available: 400, .. }));
        assert_eq!(n.used_storage, 100);
        assert_eq!(n.available_storage, 400);
        n.reserve(400).expect("exact fit");
        assert_eq!(n.available_storage, 0);
        assert!(n.storage_balanced());
    }

    #[test]
    fn test_release_is_clamped() {
        let mut n = node(500, 100);
        n.release(1_000);
        assert_eq!(n.used_storage, 0);
        assert_eq!(n.available_storage, 500);
        assert!(n.storage_balanced());
    }

    #[test]
    fn test_touch_updates_uptime() {
        let mut n = node(500, 100);
        n.touch(61_000);
        assert_eq!(n.performance.uptime_secs, 60);
        n.touch(2_000);
        assert_eq!(n.last_activity, 61_000);
    }

    #[test]
    fn test_allocation_expiry() {
        let a = StorageAllocation {
            id: "a".into(),
            node_id: "n".into(),
            optimization_id: String::new(),
            amount: 1,
            purpose: "cache".into(),
            priority: Priority::Low,
            created_at: 0,
            expires_at: Some(10),
        };
        assert!(!a.is_expired(9));
        assert!(a.is_expired(10));
    }

    #[test]
    fn test_biome_is_first_tag() {
        assert_eq!(node(1, 0).biome(), Some("knowledge"));
    }
}
