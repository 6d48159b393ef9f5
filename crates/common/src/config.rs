//! Engine configuration loaded from TOML with serde.
//!
//! Every section has a `Default` carrying the reference constants, and
//! every field is `#[serde(default)]`, so a config file only needs to list
//! the values it overrides. The configuration is immutable once a
//! component has been constructed from it.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, Result};
use crate::types::NodeType;

// ════════════════════════════════════════════════════════════════════════════
// NODE TYPES
// ════════════════════════════════════════════════════════════════════════════

/// Static parameters of one node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTypeSpec {
    /// Storage pre-reserved as used when a node is created (node overhead).
    pub base_storage: u64,
    /// Upper bound on `storage_capacity` for nodes of this type.
    pub max_storage: u64,
    /// Compute power assigned at creation.
    pub compute_power: f64,
    /// Reward units per 1000 storage units per task / day.
    pub reward_rate: f64,
    /// Efficiency (0-100) a new node starts with.
    #[serde(default = "default_initial_efficiency")]
    pub initial_efficiency: f64,
}

fn default_initial_efficiency() -> f64 {
    75.0
}

/// Table of node type definitions keyed by [`NodeType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeTypeTable {
    specs: BTreeMap<NodeType, NodeTypeSpec>,
}

impl NodeTypeTable {
    pub fn new(specs: BTreeMap<NodeType, NodeTypeSpec>) -> Self {
        Self { specs }
    }

    /// Look up the spec for a node type.
    ///
    /// Returns [`HarvestError::UnknownNodeType`] when the table has no
    /// entry for the type.
    pub fn spec(&self, node_type: NodeType) -> Result<&NodeTypeSpec> {
        self.specs
            .get(&node_type)
            .ok_or_else(|| HarvestError::UnknownNodeType(node_type.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeType, &NodeTypeSpec)> {
        self.specs.iter()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl Default for NodeTypeTable {
    fn default() -> Self {
        let mut specs = BTreeMap::new();
        specs.insert(
            NodeType::Storage,
            NodeTypeSpec {
                base_storage: 100,
                max_storage: 10_000,
                compute_power: 10.0,
                reward_rate: 1.0,
                initial_efficiency: 75.0,
            },
        );
        specs.insert(
            NodeType::Compute,
            NodeTypeSpec {
                base_storage: 50,
                max_storage: 5_000,
                compute_power: 50.0,
                reward_rate: 1.5,
                initial_efficiency: 75.0,
            },
        );
        specs.insert(
            NodeType::Optimization,
            NodeTypeSpec {
                base_storage: 200,
                max_storage: 50_000,
                compute_power: 25.0,
                reward_rate: 2.0,
                initial_efficiency: 80.0,
            },
        );
        specs.insert(
            NodeType::Archive,
            NodeTypeSpec {
                base_storage: 500,
                max_storage: 100_000,
                compute_power: 5.0,
                reward_rate: 0.5,
                initial_efficiency: 70.0,
            },
        );
        Self { specs }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// REWARDS
// ════════════════════════════════════════════════════════════════════════════

/// Quality bonus awarded when an event's size reaches `min_kb`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizeTier {
    pub min_kb: u64,
    pub bonus: i32,
}

/// Quality bonus awarded when an event carries `key` as a tag or category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BonusRule {
    pub key: String,
    pub bonus: i32,
}

/// Reward multiplier applied once a harvester reaches `min_reputation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationTier {
    pub min_reputation: u64,
    pub multiplier: f64,
}

/// Asset grant tier: one grant per whole `threshold_kb` of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetTier {
    pub name: String,
    pub threshold_kb: u64,
    /// Stake units granted per KB of threshold.
    pub stake_rate: f64,
}

/// Scoring and pricing constants for the optimization ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    /// Events below this many saved bytes are rejected.
    pub min_event_bytes: u64,
    pub global_space_multiplier: f64,
    pub base_space_rate: f64,
    pub base_quality: i32,
    /// Size bonuses, checked from largest `min_kb` down; first match wins.
    pub size_tiers: Vec<SizeTier>,
    pub tag_bonuses: Vec<BonusRule>,
    pub category_bonuses: Vec<BonusRule>,
    /// Reputation tiers, checked from largest `min_reputation` down.
    pub reputation_tiers: Vec<ReputationTier>,
    /// Exactly four tiers, ascending by threshold.
    pub asset_tiers: Vec<AssetTier>,
    /// When set, events that earn grants provision a derived node.
    pub provision_nodes: bool,
    pub provision_node_type: NodeType,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            min_event_bytes: 1024,
            global_space_multiplier: 1.5,
            base_space_rate: 100.0,
            base_quality: 50,
            size_tiers: vec![
                SizeTier { min_kb: 100, bonus: 20 },
                SizeTier { min_kb: 50, bonus: 15 },
                SizeTier { min_kb: 10, bonus: 10 },
                SizeTier { min_kb: 5, bonus: 5 },
            ],
            tag_bonuses: vec![
                BonusRule { key: "ai".into(), bonus: 15 },
                BonusRule { key: "critical".into(), bonus: 10 },
                BonusRule { key: "lazy".into(), bonus: 5 },
            ],
            category_bonuses: vec![
                BonusRule { key: "professional".into(), bonus: 10 },
                BonusRule { key: "commercial".into(), bonus: 8 },
                BonusRule { key: "knowledge".into(), bonus: 6 },
            ],
            reputation_tiers: vec![
                ReputationTier { min_reputation: 10_000, multiplier: 5.0 },
                ReputationTier { min_reputation: 5_000, multiplier: 3.0 },
                ReputationTier { min_reputation: 1_000, multiplier: 2.0 },
                ReputationTier { min_reputation: 100, multiplier: 1.5 },
            ],
            asset_tiers: vec![
                AssetTier { name: "seed".into(), threshold_kb: 10, stake_rate: 0.1 },
                AssetTier { name: "sprout".into(), threshold_kb: 50, stake_rate: 0.25 },
                AssetTier { name: "grove".into(), threshold_kb: 100, stake_rate: 0.5 },
                AssetTier { name: "forest".into(), threshold_kb: 500, stake_rate: 1.0 },
            ],
            provision_nodes: false,
            provision_node_type: NodeType::Optimization,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// SCHEDULER
// ════════════════════════════════════════════════════════════════════════════

/// Tuning for the ingestion scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of items in `processing` at once.
    pub max_concurrent: usize,
    /// Retries allowed after the first failed attempt.
    pub max_retries: u32,
    pub process_interval_ms: u64,
    pub stats_interval_ms: u64,
    /// Upper bound on one analyzer call. `None` disables the timeout.
    pub analyzer_timeout_ms: Option<u64>,
    /// Address credited for events produced by the scheduler.
    pub harvester_address: String,
    /// Utilization % below which a recommendation is emitted.
    pub utilization_low_watermark: f64,
    /// Pending count above which a backlog recommendation is emitted.
    pub backlog_high_watermark: usize,
    /// Capacity of the notification broadcast channel.
    pub notification_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_retries: 3,
            process_interval_ms: 1_000,
            stats_interval_ms: 30_000,
            analyzer_timeout_ms: Some(30_000),
            harvester_address: "harvestd-local".to_string(),
            utilization_low_watermark: 30.0,
            backlog_high_watermark: 50,
            notification_capacity: 256,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// ENGINE CONFIG
// ════════════════════════════════════════════════════════════════════════════

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub node_types: NodeTypeTable,
    pub rewards: RewardConfig,
    pub scheduler: SchedulerConfig,
}

impl EngineConfig {
    /// Check internal consistency.
    ///
    /// Rejects type specs whose base exceeds max, non-positive rates,
    /// asset tiers that are not four ascending thresholds, and scheduler
    /// settings that would stall the loop.
    pub fn validate(&self) -> Result<()> {
        if self.node_types.is_empty() {
            return Err(HarvestError::Config("node type table is empty".into()));
        }
        for (node_type, spec) in self.node_types.iter() {
            if spec.base_storage > spec.max_storage {
                return Err(HarvestError::Config(format!(
                    "{}: base_storage {} exceeds max_storage {}",
                    node_type, spec.base_storage, spec.max_storage
                )));
            }
            if spec.reward_rate < 0.0 || spec.compute_power < 0.0 {
                return Err(HarvestError::Config(format!(
                    "{}: reward_rate and compute_power must be >= 0",
                    node_type
                )));
            }
            if !(0.0..=100.0).contains(&spec.initial_efficiency) {
                return Err(HarvestError::Config(format!(
                    "{}: initial_efficiency must be within 0-100",
                    node_type
                )));
            }
        }

        let r = &self.rewards;
        if r.base_space_rate <= 0.0 {
            return Err(HarvestError::Config("rewards.base_space_rate must be > 0".into()));
        }
        if r.asset_tiers.len() != 4 {
            return Err(HarvestError::Config(format!(
                "rewards.asset_tiers must define exactly 4 tiers, got {}",
                r.asset_tiers.len()
            )));
        }
        let mut prev = 0u64;
        for tier in &r.asset_tiers {
            if tier.threshold_kb <= prev {
                return Err(HarvestError::Config(format!(
                    "rewards.asset_tiers must be strictly ascending and > 0 (tier {})",
                    tier.name
                )));
            }
            prev = tier.threshold_kb;
        }
        if r.provision_nodes {
            self.node_types.spec(r.provision_node_type)?;
        }

        let s = &self.scheduler;
        if s.max_concurrent == 0 {
            return Err(HarvestError::Config("scheduler.max_concurrent must be >= 1".into()));
        }
        if s.process_interval_ms == 0 || s.stats_interval_ms == 0 {
            return Err(HarvestError::Config("scheduler intervals must be > 0".into()));
        }
        if s.notification_capacity == 0 {
            return Err(HarvestError::Config(
                "scheduler.notification_capacity must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

/// Load config from a TOML file path.
/// If file is missing or parse fails, an error is returned.
pub fn load_from_file(path: impl AsRef<Path>) -> Result<EngineConfig> {
    let p = path.as_ref();
    let s = fs::read_to_string(p)?;
    let cfg: EngineConfig = toml::from_str(&s)?;
    Ok(cfg)
}
