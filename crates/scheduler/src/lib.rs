//! # Harvest Scheduler Crate
//!
//! Priority ingestion queue feeding the optimization ledger. Targets are
//! enqueued with a priority, analyzed by an external [`Analyzer`] under a
//! bounded number of concurrent calls, retried on failure, and the
//! resulting savings are submitted to the ledger as events.
//!
//! ## Modules
//! - `analyzer`: the async collaborator contract
//! - `queue`: queue items and the priority / FIFO index
//! - `report`: periodic reports, recommendations and notifications
//! - `scheduler`: [`IngestionScheduler`], the dispatch loop
//!
//! The `harvestd` binary wires all components together from an
//! [`EngineConfig`](harvest_common::EngineConfig).

pub mod analyzer;
pub mod queue;
pub mod report;
pub mod scheduler;

pub use analyzer::{AnalysisReport, Analyzer, AnalyzerError};
pub use queue::{ItemStatus, PriorityBreakdown, QueueItem, QueueStatus};
pub use report::{SchedulerNotification, SchedulerReport};
pub use scheduler::IngestionScheduler;
