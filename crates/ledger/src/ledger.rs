//! # Optimization Ledger
//!
//! Scores submitted events, credits harvester accounts, derives asset
//! grants and stores every result keyed by fingerprint.
//!
//! ## Submission Flow
//!
//! ```text
//! submit(event)
//!   │ bytes < min_event_bytes ──▶ Validation
//!   ▼
//! fingerprint = SHA3(target | bytes | timestamp)
//!   ▼
//! lock book
//!   │ fingerprint recorded ──▶ return stored result (no credit)
//!   ▼
//! lock harvester (created on first event)
//!   ▼
//! score, reward, grants ─▶ store ─▶ credit harvester
//!   ▼ (locks released)
//! optional: provision derived node + task in NodeRegistry
//! ```
//!
//! ## Locking
//!
//! Each harvester is a `parking_lot::Mutex` inside an `RwLock` map.
//! Submission takes the book mutex first, then the harvester map, then
//! the harvester. Queries never hold the map or a harvester while taking
//! the book. Registry calls happen with no ledger lock held.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use harvest_common::{now_ms, EntityKind, HarvestError, Result, RewardConfig};
use harvest_node::{NodeRegistry, TaskType};

use crate::model::{AssetGrant, Harvester, LedgerTotals, OptimizationEvent, OptimizationResult};
use crate::scoring;

#[derive(Debug, Default)]
struct Book {
    results: HashMap<String, OptimizationResult>,
    /// Fingerprints in submission order.
    order: Vec<String>,
}

/// Event scoring and reward accounting.
pub struct OptimizationLedger {
    config: RewardConfig,
    registry: Arc<NodeRegistry>,
    harvesters: RwLock<HashMap<String, Arc<Mutex<Harvester>>>>,
    book: Mutex<Book>,
}

impl OptimizationLedger {
    pub fn new(config: RewardConfig, registry: Arc<NodeRegistry>) -> Self {
        Self {
            config,
            registry,
            harvesters: RwLock::new(HashMap::new()),
            book: Mutex::new(Book::default()),
        }
    }

    pub fn config(&self) -> &RewardConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    fn harvester_handle(&self, address: &str, now: u64) -> Arc<Mutex<Harvester>> {
        if let Some(handle) = self.harvesters.read().get(address) {
            return Arc::clone(handle);
        }
        let mut map = self.harvesters.write();
        let handle = map.entry(address.to_string()).or_insert_with(|| {
            info!("new harvester {}", address);
            Arc::new(Mutex::new(Harvester::new(address, now)))
        });
        Arc::clone(handle)
    }

    // ────────────────────────────────────────────────────────────────────────
    // Submission
    // ────────────────────────────────────────────────────────────────────────

    /// Score and record an optimization event.
    ///
    /// ## Errors
    ///
    /// - [`HarvestError::Validation`] when fewer than `min_event_bytes`
    ///   were saved, or the target or harvester address is empty.
    ///
    /// Resubmitting an already recorded fingerprint returns the stored
    /// result and credits nothing.
    pub fn submit(&self, event: OptimizationEvent) -> Result<OptimizationResult> {
        if event.space_saved_bytes < self.config.min_event_bytes {
            return Err(HarvestError::Validation(format!(
                "event saved {} bytes, minimum is {}",
                event.space_saved_bytes, self.config.min_event_bytes
            )));
        }
        if event.target.trim().is_empty() {
            return Err(HarvestError::Validation("event target is empty".into()));
        }
        if event.harvester.trim().is_empty() {
            return Err(HarvestError::Validation("harvester address is empty".into()));
        }

        let fingerprint =
            scoring::fingerprint(&event.target, event.space_saved_bytes, event.timestamp_ms);
        let now = now_ms();

        let result = {
            let mut book = self.book.lock();
            if let Some(stored) = book.results.get(&fingerprint) {
                debug!("replayed event {}, returning stored result", fingerprint);
                return Ok(stored.clone());
            }
            let handle = self.harvester_handle(&event.harvester, now);
            let mut harvester = handle.lock();

            let size_kb = scoring::size_kb(event.space_saved_bytes);
            let quality_score = scoring::quality_score(&self.config, &event);
            let reputation_multiplier =
                scoring::reputation_multiplier(&self.config, harvester.reputation);
            let reward =
                scoring::reward(&self.config, size_kb, reputation_multiplier, quality_score);
            let asset_grants =
                scoring::derive_grants(&self.config, size_kb, &event.harvester, &fingerprint);

            let result = OptimizationResult {
                fingerprint: fingerprint.clone(),
                event,
                size_kb,
                quality_score,
                reputation_multiplier,
                reward,
                asset_grants,
                derived_node_id: None,
                recorded_at: now,
            };
            harvester.credit(&result, now);
            book.order.push(fingerprint.clone());
            book.results.insert(fingerprint.clone(), result.clone());
            result
        };

        info!(
            "event {} from {}: {} KB, quality {}, x{}, reward {:.6}, {} grants",
            result.fingerprint,
            result.event.harvester,
            result.size_kb,
            result.quality_score,
            result.reputation_multiplier,
            result.reward,
            result.asset_grants.len()
        );

        if self.config.provision_nodes && !result.asset_grants.is_empty() {
            if let Some(node_id) = self.provision(&result) {
                let mut book = self.book.lock();
                if let Some(stored) = book.results.get_mut(&fingerprint) {
                    stored.derived_node_id = Some(node_id);
                    return Ok(stored.clone());
                }
            }
        }
        Ok(result)
    }

    /// Turn an event's saved space into a node and a follow-up task.
    ///
    /// Failures are logged; the ledger result stands either way.
    fn provision(&self, result: &OptimizationResult) -> Option<String> {
        let node_type = self.config.provision_node_type;
        let tags: Vec<String> = result.event.category.iter().cloned().collect();
        let node = match self.registry.create_node(node_type, result.size_kb, tags) {
            Ok(node) => node,
            Err(e) => {
                warn!("provisioning for {} failed: {}", result.fingerprint, e);
                return None;
            }
        };
        if let Err(e) = self
            .registry
            .attach_source_event(&node.id, &result.fingerprint)
        {
            warn!("attach source event {} failed: {}", result.fingerprint, e);
        }
        match self
            .registry
            .create_task(&node.id, TaskType::Compression, result.event.target.clone())
        {
            Ok(task) => debug!("provisioned node {} with task {}", node.id, task.id),
            Err(e) => warn!("task for provisioned node {} failed: {}", node.id, e),
        }
        Some(node.id)
    }

    // ────────────────────────────────────────────────────────────────────────
    // Queries
    // ────────────────────────────────────────────────────────────────────────

    /// Every stored result in submission order.
    pub fn events(&self) -> Vec<OptimizationResult> {
        let book = self.book.lock();
        book.order
            .iter()
            .filter_map(|fp| book.results.get(fp).cloned())
            .collect()
    }

    /// The `limit` most recent results, newest first.
    pub fn recent_events(&self, limit: usize) -> Vec<OptimizationResult> {
        let book = self.book.lock();
        book.order
            .iter()
            .rev()
            .take(limit)
            .filter_map(|fp| book.results.get(fp).cloned())
            .collect()
    }

    pub fn get_event(&self, fingerprint: &str) -> Option<OptimizationResult> {
        self.book.lock().results.get(fingerprint).cloned()
    }

    pub fn event_count(&self) -> usize {
        self.book.lock().order.len()
    }

    pub fn harvester(&self, address: &str) -> Result<Harvester> {
        self.harvesters
            .read()
            .get(address)
            .map(|h| h.lock().clone())
            .ok_or_else(|| HarvestError::not_found(EntityKind::Harvester, address))
    }

    /// All harvesters, sorted by address.
    pub fn harvesters(&self) -> Vec<Harvester> {
        let handles: Vec<Arc<Mutex<Harvester>>> =
            self.harvesters.read().values().cloned().collect();
        let mut out: Vec<Harvester> = handles.iter().map(|h| h.lock().clone()).collect();
        out.sort_by(|a, b| a.address.cmp(&b.address));
        out
    }

    /// Every grant issued, in submission order.
    pub fn asset_grants(&self) -> Vec<AssetGrant> {
        let book = self.book.lock();
        book.order
            .iter()
            .filter_map(|fp| book.results.get(fp))
            .flat_map(|r| r.asset_grants.iter().cloned())
            .collect()
    }

    /// Mean of storage utilization %, active-node % and events per node,
    /// each clamped to `[0, 100]`.
    pub fn network_efficiency(&self) -> f64 {
        let stats = self.registry.system_stats();
        let utilization = stats.storage_utilization.clamp(0.0, 100.0);
        let (active_pct, throughput) = if stats.total_nodes == 0 {
            (0.0, 0.0)
        } else {
            let nodes = stats.total_nodes as f64;
            (
                stats.active_nodes as f64 / nodes * 100.0,
                self.event_count() as f64 / nodes,
            )
        };
        (utilization + active_pct.clamp(0.0, 100.0) + throughput.clamp(0.0, 100.0)) / 3.0
    }

    pub fn totals(&self) -> LedgerTotals {
        let harvester_count = self.harvesters.read().len();
        let book = self.book.lock();
        let mut totals = LedgerTotals {
            event_count: book.order.len(),
            total_bytes: 0,
            total_reward: 0.0,
            harvester_count,
            grant_count: 0,
        };
        for result in book.results.values() {
            totals.total_bytes = totals
                .total_bytes
                .saturating_add(result.event.space_saved_bytes);
            totals.total_reward += result.reward;
            totals.grant_count += result.asset_grants.len();
        }
        totals
    }
}

impl std::fmt::Debug for OptimizationLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let harvesters = self.harvesters.read().len();
        let events = self.event_count();
        f.debug_struct("OptimizationLedger")
            .field("harvesters", &harvesters)
            .field("events", &events)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_common::NodeTypeTable;

    fn ledger() -> OptimizationLedger {
        OptimizationLedger::new(
            RewardConfig::default(),
            Arc::new(NodeRegistry::new(NodeTypeTable::default())),
        )
    }

    #[test]
    fn test_empty_fields_rejected() {
        let l = ledger();
        assert!(matches!(
            l.submit(OptimizationEvent::new("  ", 4096, "h", 1)),
            Err(HarvestError::Validation(_))
        ));
        assert!(matches!(
            l.submit(OptimizationEvent::new("https://a.example", 4096, "", 1)),
            Err(HarvestError::Validation(_))
        ));
        assert_eq!(l.event_count(), 0);
        assert!(l.harvesters().is_empty());
    }

    #[test]
    fn test_unknown_harvester_not_found() {
        let l = ledger();
        assert!(matches!(
            l.harvester("nobody"),
            Err(HarvestError::NotFound { kind: EntityKind::Harvester, .. })
        ));
    }

    #[test]
    fn test_network_efficiency_empty_registry() {
        assert_eq!(ledger().network_efficiency(), 0.0);
    }

    #[test]
    fn test_recent_events_newest_first() {
        let l = ledger();
        for ts in 1..=3 {
            l.submit(OptimizationEvent::new("https://a.example", 2048, "h", ts))
                .expect("submit");
        }
        let recent = l.recent_events(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].event.timestamp_ms, 3);
        assert_eq!(recent[1].event.timestamp_ms, 2);
    }
}
