//! Ledger entities: events, scored results, harvester accounts, grants.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ════════════════════════════════════════════════════════════════════════════
// EVENT
// ════════════════════════════════════════════════════════════════════════════

/// An externally reported unit of saved space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizationEvent {
    pub target: String,
    pub space_saved_bytes: u64,
    #[serde(default)]
    pub category_tags: Vec<String>,
    /// Biome of the target (`professional`, `commercial`, ...).
    #[serde(default)]
    pub category: Option<String>,
    /// Address of the submitting harvester.
    pub harvester: String,
    pub timestamp_ms: u64,
}

impl OptimizationEvent {
    pub fn new(
        target: impl Into<String>,
        space_saved_bytes: u64,
        harvester: impl Into<String>,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            target: target.into(),
            space_saved_bytes,
            category_tags: Vec::new(),
            category: None,
            harvester: harvester.into(),
            timestamp_ms,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.category_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

// ════════════════════════════════════════════════════════════════════════════
// RESULT
// ════════════════════════════════════════════════════════════════════════════

/// A reward unit derived from one whole multiple of an asset tier threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetGrant {
    pub id: String,
    pub tier: String,
    pub threshold_kb: u64,
    /// `threshold_kb * stake_rate`.
    pub stake: f64,
    pub harvester: String,
    /// Fingerprint of the event that produced the grant.
    pub fingerprint: String,
}

/// A scored, stored event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub fingerprint: String,
    pub event: OptimizationEvent,
    pub size_kb: u64,
    pub quality_score: u8,
    pub reputation_multiplier: f64,
    pub reward: f64,
    pub asset_grants: Vec<AssetGrant>,
    /// Node provisioned from this event's capacity, if any.
    pub derived_node_id: Option<String>,
    pub recorded_at: u64,
}

// ════════════════════════════════════════════════════════════════════════════
// HARVESTER
// ════════════════════════════════════════════════════════════════════════════

/// Reward account keyed by address. Created on first event, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Harvester {
    pub address: String,
    /// Grows by `size_kb` per event; never decreases.
    pub reputation: u64,
    pub total_size_bytes: u64,
    pub total_reward: f64,
    pub event_count: u64,
    /// Grants received, by tier name.
    pub grants_by_tier: BTreeMap<String, u64>,
    pub first_seen: u64,
    pub last_seen: u64,
}

impl Harvester {
    pub(crate) fn new(address: &str, now: u64) -> Self {
        Self {
            address: address.to_string(),
            reputation: 0,
            total_size_bytes: 0,
            total_reward: 0.0,
            event_count: 0,
            grants_by_tier: BTreeMap::new(),
            first_seen: now,
            last_seen: now,
        }
    }

    pub(crate) fn credit(&mut self, result: &OptimizationResult, now: u64) {
        self.total_size_bytes = self
            .total_size_bytes
            .saturating_add(result.event.space_saved_bytes);
        self.total_reward += result.reward;
        self.event_count += 1;
        self.reputation = self.reputation.saturating_add(result.size_kb);
        for grant in &result.asset_grants {
            *self.grants_by_tier.entry(grant.tier.clone()).or_insert(0) += 1;
        }
        self.last_seen = now.max(self.last_seen);
    }

    pub fn total_grants(&self) -> u64 {
        self.grants_by_tier.values().sum()
    }
}

/// Ledger-wide totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerTotals {
    pub event_count: usize,
    pub total_bytes: u64,
    pub total_reward: f64,
    pub harvester_count: usize,
    pub grant_count: usize,
}
