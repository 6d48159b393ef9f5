//! Opportunistic storage rebalancing.
//!
//! One pass walks active nodes from most to least efficient. For each
//! node with free storage it picks the oldest low-priority allocation
//! sitting on a different, less efficient active node that fits, and moves
//! it over. The allocation keeps its id; only its `node_id` changes. At
//! most one allocation lands on each target per pass.

use std::collections::{HashMap, HashSet};

use parking_lot::MutexGuard;
use tracing::{debug, info};

use harvest_common::{now_ms, Priority};

use crate::model::{Node, StorageAllocation};
use crate::registry::NodeRegistry;

#[derive(Debug, Clone)]
struct Candidate {
    id: String,
    efficiency: f64,
}

impl NodeRegistry {
    /// Run one rebalancing pass and return the number of allocations moved.
    ///
    /// Best-effort: never fails, and does nothing when no allocation
    /// qualifies.
    pub fn rebalance(&self) -> usize {
        let mut active: Vec<Candidate> = self
            .list_nodes()
            .into_iter()
            .filter(Node::is_active)
            .map(|n| Candidate {
                id: n.id,
                efficiency: n.performance.efficiency,
            })
            .collect();
        active.sort_by(|a, b| {
            b.efficiency
                .partial_cmp(&a.efficiency)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        let efficiency: HashMap<String, f64> = active
            .iter()
            .map(|c| (c.id.clone(), c.efficiency))
            .collect();

        let mut low: Vec<StorageAllocation> = self
            .allocations
            .read()
            .values()
            .filter(|a| a.priority == Priority::Low)
            .cloned()
            .collect();
        low.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let mut moved_ids: HashSet<String> = HashSet::new();
        let mut moves = 0;
        for target in &active {
            let available = match self.get_node(&target.id) {
                Some(n) if n.is_active() && n.available_storage > 0 => n.available_storage,
                _ => continue,
            };
            let pick = low.iter().find(|a| {
                !moved_ids.contains(&a.id)
                    && a.node_id != target.id
                    && a.amount <= available
                    && efficiency
                        .get(&a.node_id)
                        .is_some_and(|&src| src < target.efficiency)
            });
            let Some(allocation) = pick else {
                continue;
            };
            if self.move_allocation(&allocation.id, &allocation.node_id, &target.id) {
                moved_ids.insert(allocation.id.clone());
                moves += 1;
            }
        }
        if moves > 0 {
            info!("rebalance moved {} allocations", moves);
        } else {
            debug!("rebalance found nothing to move");
        }
        moves
    }

    /// Move an allocation between two nodes atomically.
    ///
    /// Returns `false` with no mutation if either node is missing or
    /// inactive, the allocation is no longer on `from`, or it does not fit.
    fn move_allocation(&self, allocation_id: &str, from: &str, to: &str) -> bool {
        let (Ok(src), Ok(dst)) = (self.node_handle(from), self.node_handle(to)) else {
            return false;
        };
        // Lock in id order.
        let (mut src_guard, mut dst_guard): (MutexGuard<'_, Node>, MutexGuard<'_, Node>) =
            if from < to {
                let s = src.lock();
                let d = dst.lock();
                (s, d)
            } else {
                let d = dst.lock();
                let s = src.lock();
                (s, d)
            };
        if !src_guard.is_active() || !dst_guard.is_active() {
            return false;
        }

        let mut allocations = self.allocations.write();
        let Some(allocation) = allocations.get_mut(allocation_id) else {
            return false;
        };
        if allocation.node_id != from {
            return false;
        }
        if dst_guard.reserve(allocation.amount).is_err() {
            return false;
        }
        src_guard.release(allocation.amount);
        allocation.node_id = to.to_string();

        let now = now_ms();
        src_guard.touch(now);
        dst_guard.touch(now);
        debug!(
            "moved allocation {} ({}) from {} to {}",
            allocation_id, allocation.amount, from, to
        );
        true
    }
}
