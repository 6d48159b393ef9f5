//! # Ingestion Queue
//!
//! Pure, synchronous queue state. The scheduler wraps it in a mutex and
//! never holds that mutex across an analyzer call.
//!
//! ## Item Lifecycle
//!
//! ```text
//! enqueue ──▶ Pending ──dequeue──▶ Processing ──┬── success ──▶ Completed
//!               ▲                               │
//!               └──── retry_count < max ◀───────┤
//!                                               └── exhausted ──▶ Failed
//! ```
//!
//! ## Ordering
//!
//! Pending items are indexed by `(Reverse(priority), sequence)`: highest
//! priority first, FIFO within a tier. The sequence is assigned once at
//! enqueue, so a retried item keeps its original place in its tier.
//!
//! ## Retry Budget
//!
//! On failure, if `retry_count < max_retries` the count is incremented and
//! the item returns to pending; otherwise it fails permanently. An item is
//! therefore attempted at most `max_retries + 1` times.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use harvest_common::{new_id, HarvestError, Priority};
use harvest_ledger::OptimizationResult;

use crate::analyzer::AnalysisReport;

// ════════════════════════════════════════════════════════════════════════════════
// TYPES
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// A target waiting for, undergoing, or done with analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueItem {
    pub id: String,
    pub target: String,
    pub category: Option<String>,
    pub priority: Priority,
    pub status: ItemStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Analyzer calls started for this item.
    pub attempts: u32,
    /// Enqueue order; ties within a priority tier break on this.
    pub sequence: u64,
    pub enqueued_at: u64,
    pub processed_at: Option<u64>,
    pub report: Option<AnalysisReport>,
    /// Ledger result for the event derived from `report`.
    pub submission: Option<OptimizationResult>,
    /// Last analyzer failure, or the ledger's rejection of a completed item.
    pub error: Option<String>,
}

type PendingKey = (Reverse<Priority>, u64, String);

fn pending_key(item: &QueueItem) -> PendingKey {
    (Reverse(item.priority), item.sequence, item.id.clone())
}

/// Per-status item counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

/// Pending counts per priority tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PriorityBreakdown {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

// ════════════════════════════════════════════════════════════════════════════════
// QUEUE
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub(crate) struct IngestionQueue {
    items: HashMap<String, QueueItem>,
    pending: BTreeSet<PendingKey>,
    next_sequence: u64,
    max_retries: u32,
}

impl IngestionQueue {
    pub(crate) fn new(max_retries: u32) -> Self {
        Self {
            items: HashMap::new(),
            pending: BTreeSet::new(),
            next_sequence: 0,
            max_retries,
        }
    }

    pub(crate) fn enqueue(
        &mut self,
        target: String,
        priority: Priority,
        category: Option<String>,
        now: u64,
    ) -> String {
        let item = QueueItem {
            id: new_id("item"),
            target,
            category,
            priority,
            status: ItemStatus::Pending,
            retry_count: 0,
            max_retries: self.max_retries,
            attempts: 0,
            sequence: self.next_sequence,
            enqueued_at: now,
            processed_at: None,
            report: None,
            submission: None,
            error: None,
        };
        self.next_sequence += 1;
        let id = item.id.clone();
        self.pending.insert(pending_key(&item));
        self.items.insert(id.clone(), item);
        id
    }

    /// Take the next pending item and mark it processing.
    pub(crate) fn dequeue_next(&mut self) -> Option<QueueItem> {
        let key = self.pending.pop_first()?;
        let item = self.items.get_mut(&key.2)?;
        item.status = ItemStatus::Processing;
        item.attempts += 1;
        Some(item.clone())
    }

    /// Mark a processing item completed.
    ///
    /// A ledger rejection does not undo completion; it lands in `error`.
    pub(crate) fn complete(
        &mut self,
        item_id: &str,
        report: AnalysisReport,
        submission: Result<OptimizationResult, HarvestError>,
        now: u64,
    ) -> Option<QueueItem> {
        let item = self.processing_mut(item_id)?;
        item.status = ItemStatus::Completed;
        item.processed_at = Some(now);
        item.report = Some(report);
        match submission {
            Ok(result) => {
                item.submission = Some(result);
                item.error = None;
            }
            Err(e) => item.error = Some(format!("ledger rejected event: {}", e)),
        }
        Some(item.clone())
    }

    /// Record a failed attempt.
    ///
    /// Returns [`HarvestError::TransientTask`] when the item went back to
    /// pending, [`HarvestError::TerminalTask`] when it failed permanently,
    /// or `None` if the item was not processing.
    pub(crate) fn fail(&mut self, item_id: &str, reason: String, now: u64) -> Option<HarvestError> {
        let item = self.processing_mut(item_id)?;
        item.error = Some(reason.clone());
        if item.retry_count < item.max_retries {
            item.retry_count += 1;
            item.status = ItemStatus::Pending;
            let key = pending_key(item);
            let outcome = HarvestError::TransientTask {
                item_id: item.id.clone(),
                attempt: item.attempts,
                reason,
            };
            self.pending.insert(key);
            Some(outcome)
        } else {
            item.status = ItemStatus::Failed;
            item.processed_at = Some(now);
            Some(HarvestError::TerminalTask {
                item_id: item.id.clone(),
                attempts: item.attempts,
                reason,
            })
        }
    }

    fn processing_mut(&mut self, item_id: &str) -> Option<&mut QueueItem> {
        self.items
            .get_mut(item_id)
            .filter(|i| i.status == ItemStatus::Processing)
    }

    pub(crate) fn get(&self, item_id: &str) -> Option<&QueueItem> {
        self.items.get(item_id)
    }

    /// Every item in enqueue order.
    pub(crate) fn items(&self) -> Vec<QueueItem> {
        let mut out: Vec<QueueItem> = self.items.values().cloned().collect();
        out.sort_by_key(|i| i.sequence);
        out
    }

    pub(crate) fn status(&self) -> QueueStatus {
        let mut s = QueueStatus {
            total: self.items.len(),
            ..QueueStatus::default()
        };
        for item in self.items.values() {
            match item.status {
                ItemStatus::Pending => s.pending += 1,
                ItemStatus::Processing => s.processing += 1,
                ItemStatus::Completed => s.completed += 1,
                ItemStatus::Failed => s.failed += 1,
            }
        }
        s
    }

    pub(crate) fn pending_by_priority(&self) -> PriorityBreakdown {
        let mut b = PriorityBreakdown::default();
        for (Reverse(priority), _, _) in &self.pending {
            match priority {
                Priority::High => b.high += 1,
                Priority::Medium => b.medium += 1,
                Priority::Low => b.low += 1,
            }
        }
        b
    }

    /// Nothing pending and nothing processing.
    pub(crate) fn is_idle(&self) -> bool {
        self.pending.is_empty()
            && !self
                .items
                .values()
                .any(|i| i.status == ItemStatus::Processing)
    }
}
