//! # Harvest Node Crate
//!
//! Node lifecycle and resource accounting for the space harvest engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          NodeRegistry                            │
//! │                                                                  │
//! │  nodes: id → Mutex<Node>        allocations: id → Allocation     │
//! │  ┌───────────────────────┐      ┌──────────────────────────┐     │
//! │  │ capacity / used /     │◀─────│ allocate / deallocate /  │     │
//! │  │ available / compute   │      │ expire / rebalance       │     │
//! │  │ performance counters  │      └──────────────────────────┘     │
//! │  └──────────▲────────────┘                                       │
//! │             │ settle                                             │
//! │  ┌──────────┴────────────┐      ┌──────────────────────────┐     │
//! │  │ tasks: id → Task      │─────▶│ dyn TaskRunner (async)   │     │
//! │  │ pending→processing→   │ run  │ InstantRunner by default │     │
//! │  │ completed | failed    │      └──────────────────────────┘     │
//! │  └───────────────────────┘                                       │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - `used_storage + available_storage == storage_capacity` for every node.
//! - Allocation never partially reserves: it either fits or fails with
//!   `Capacity`.
//! - Allocate followed by deallocate restores available storage exactly.
//! - Nodes are never deleted; merged and retired nodes go offline.
//! - Task failures are recorded on the task; the registry never retries.

pub mod model;
pub mod rebalance;
pub mod registry;
pub mod runner;
pub mod stats;

pub use model::{
    AllocationRequest, Node, NodePerformance, OptimizationTask, StorageAllocation, TaskStatus,
    TaskType,
};
pub use registry::NodeRegistry;
pub use runner::{InstantRunner, TaskRunError, TaskRunner};
pub use stats::{NodeStats, SystemStats};
