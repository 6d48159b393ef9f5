//! # Harvest Common Crate
//!
//! Shared building blocks for the space harvest engine: the error
//! taxonomy every component returns, the immutable engine configuration,
//! and the small enums (node type, priority, status) that cross crate
//! boundaries.
//!
//! ## Modules
//! - `config`: `EngineConfig` and its TOML loader
//! - `error`: `HarvestError`, `EntityKind` and the crate-wide `Result` alias
//! - `types`: `NodeType`, `NodeStatus`, `Priority`
//! - `time`: wall-clock helpers in unix milliseconds
//! - `ids`: prefixed uuid entity ids
//!
//! ## Dependency Order
//! ```text
//! harvest-common ◀── harvest-node ◀── harvest-ledger ◀── harvest-scheduler
//! ```

pub mod config;
pub mod error;
pub mod ids;
pub mod time;
pub mod types;

pub use config::{
    load_from_file, AssetTier, BonusRule, EngineConfig, NodeTypeSpec, NodeTypeTable,
    ReputationTier, RewardConfig, SchedulerConfig, SizeTier,
};
pub use error::{EntityKind, HarvestError, Result};
pub use ids::new_id;
pub use time::now_ms;
pub use types::{NodeStatus, NodeType, Priority};
