//! # Engine Error Types
//!
//! `HarvestError` is the public error contract for every mutating
//! operation in the registry, ledger and scheduler.
//!
//! | Category | Variants |
//! |----------|----------|
//! | Input | `Validation`, `UnknownNodeType`, `Config` |
//! | Resources | `Capacity` |
//! | Lookup | `NotFound` |
//! | Lifecycle | `InvalidState` |
//! | Queue execution | `TransientTask`, `TerminalTask` |
//!
//! Validation, capacity, not-found and invalid-state errors are returned
//! synchronously to the caller. Queue execution errors are recorded on the
//! queue item and surfaced through notifications; they never unwind the
//! scheduler loop.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of entity referenced by a [`HarvestError::NotFound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Node,
    Allocation,
    Task,
    QueueItem,
    Harvester,
    Event,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Node => "node",
            Self::Allocation => "allocation",
            Self::Task => "task",
            Self::QueueItem => "queue item",
            Self::Harvester => "harvester",
            Self::Event => "event",
        };
        f.write_str(s)
    }
}

/// Errors produced by the space harvest engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HarvestError {
    /// Input rejected before any state change (e.g. event below 1KB).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Requested storage exceeds the node's available storage.
    #[error("insufficient capacity on {node_id}: requested {requested}, available {available}")]
    Capacity {
        node_id: String,
        requested: u64,
        available: u64,
    },

    /// Referenced entity does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    /// Operation not permitted in the entity's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Node type has no spec in the configured type table.
    #[error("unknown node type: {0}")]
    UnknownNodeType(String),

    /// Queue item failed; it has been returned to the pending set.
    #[error("item {item_id} failed on attempt {attempt}, will retry: {reason}")]
    TransientTask {
        item_id: String,
        attempt: u32,
        reason: String,
    },

    /// Queue item failed and its retry budget is exhausted.
    #[error("item {item_id} failed permanently after {attempts} attempts: {reason}")]
    TerminalTask {
        item_id: String,
        attempts: u32,
        reason: String,
    },

    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),
}

impl HarvestError {
    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Returns `true` for errors the scheduler treats as retryable.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientTask { .. })
    }
}

impl From<std::io::Error> for HarvestError {
    fn from(e: std::io::Error) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<toml::de::Error> for HarvestError {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.to_string())
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, HarvestError>;
