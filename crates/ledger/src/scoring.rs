//! # Event Scoring
//!
//! Pure functions over [`RewardConfig`]. Nothing here touches ledger
//! state, so every rule can be tested in isolation.
//!
//! ```text
//! size_kb  = bytes / 1024
//! quality  = clamp(base + size tier + tag bonuses + category bonus, 0, 100)
//! reward   = (size_kb * global_space_multiplier / base_space_rate)
//!            * reputation_multiplier * (quality / 100)
//! grants   = Σ tiers: size_kb / threshold_kb
//! ```

use sha3::{Digest, Sha3_256};

use harvest_common::{new_id, RewardConfig};

use crate::model::{AssetGrant, OptimizationEvent};

/// Whole kilobytes saved.
pub fn size_kb(bytes: u64) -> u64 {
    bytes / 1024
}

/// Quality score in `[0, 100]`.
///
/// Only the highest size tier reached counts. Each tag rule and each
/// category rule applies at most once, matched case-insensitively.
pub fn quality_score(config: &RewardConfig, event: &OptimizationEvent) -> u8 {
    let kb = size_kb(event.space_saved_bytes);

    let size_bonus = config
        .size_tiers
        .iter()
        .filter(|t| kb >= t.min_kb)
        .max_by_key(|t| t.min_kb)
        .map_or(0, |t| t.bonus);

    let tag_bonus: i32 = config
        .tag_bonuses
        .iter()
        .filter(|rule| {
            event
                .category_tags
                .iter()
                .any(|tag| tag.eq_ignore_ascii_case(&rule.key))
        })
        .map(|rule| rule.bonus)
        .sum();

    let category_bonus: i32 = event.category.as_deref().map_or(0, |category| {
        config
            .category_bonuses
            .iter()
            .filter(|rule| category.eq_ignore_ascii_case(&rule.key))
            .map(|rule| rule.bonus)
            .sum()
    });

    let raw = config
        .base_quality
        .saturating_add(size_bonus)
        .saturating_add(tag_bonus)
        .saturating_add(category_bonus);
    raw.clamp(0, 100) as u8
}

/// Multiplier for the highest reputation tier reached, or `1.0`.
pub fn reputation_multiplier(config: &RewardConfig, reputation: u64) -> f64 {
    config
        .reputation_tiers
        .iter()
        .filter(|t| reputation >= t.min_reputation)
        .max_by_key(|t| t.min_reputation)
        .map_or(1.0, |t| t.multiplier)
}

pub fn reward(config: &RewardConfig, size_kb: u64, multiplier: f64, quality: u8) -> f64 {
    (size_kb as f64 * config.global_space_multiplier / config.base_space_rate)
        * multiplier
        * (f64::from(quality) / 100.0)
}

/// One grant per whole multiple of each tier threshold, smallest tier first.
pub fn derive_grants(
    config: &RewardConfig,
    size_kb: u64,
    harvester: &str,
    fingerprint: &str,
) -> Vec<AssetGrant> {
    let mut tiers: Vec<_> = config
        .asset_tiers
        .iter()
        .filter(|t| t.threshold_kb > 0)
        .collect();
    tiers.sort_by_key(|t| t.threshold_kb);

    let mut grants = Vec::new();
    for tier in tiers {
        let count = size_kb / tier.threshold_kb;
        for _ in 0..count {
            grants.push(AssetGrant {
                id: new_id("grant"),
                tier: tier.name.clone(),
                threshold_kb: tier.threshold_kb,
                stake: tier.threshold_kb as f64 * tier.stake_rate,
                harvester: harvester.to_string(),
                fingerprint: fingerprint.to_string(),
            });
        }
    }
    grants
}

/// Deterministic SHA3-256 fingerprint, hex encoded.
///
/// Input layout:
/// ```text
/// [ target: utf-8 ][ '|' ][ bytes: 8 BE ][ '|' ][ timestamp_ms: 8 BE ]
/// ```
pub fn fingerprint(target: &str, bytes: u64, timestamp_ms: u64) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(target.as_bytes());
    hasher.update(b"|");
    hasher.update(bytes.to_be_bytes());
    hasher.update(b"|");
    hasher.update(timestamp_ms.to_be_bytes());
    hex::encode(hasher.finalize())
}
