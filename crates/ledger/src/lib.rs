//! # Harvest Ledger Crate
//!
//! Turns reported optimization events into rewards. Each event is scored
//! for quality, priced against the submitting harvester's reputation,
//! split into tiered asset grants and stored under a deterministic SHA3
//! fingerprint.
//!
//! ## Modules
//! - `model`: events, results, harvester accounts, grants
//! - `scoring`: pure scoring and pricing rules
//! - `ledger`: [`OptimizationLedger`], the stateful store
//!
//! ## Example
//!
//! ```rust,ignore
//! let registry = Arc::new(NodeRegistry::new(NodeTypeTable::default()));
//! let ledger = OptimizationLedger::new(RewardConfig::default(), registry);
//! let result = ledger.submit(OptimizationEvent::new("https://a.example", 2048, "h1", now_ms()))?;
//! assert_eq!(result.quality_score, 50);
//! ```

pub mod ledger;
pub mod model;
pub mod scoring;

pub use ledger::OptimizationLedger;
pub use model::{AssetGrant, Harvester, LedgerTotals, OptimizationEvent, OptimizationResult};
