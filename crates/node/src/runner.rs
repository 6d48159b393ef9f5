//! # Task Runner Collaborator
//!
//! The time-consuming part of [`NodeRegistry::execute_task`](crate::NodeRegistry::execute_task)
//! is delegated to a [`TaskRunner`]. The registry does the bookkeeping
//! (status transitions, space/reward computation, node counters); the
//! runner performs the actual unit of work.
//!
//! ## Contract
//!
//! - Implementations MUST NOT retry internally. Retry belongs to the
//!   ingestion scheduler.
//! - Implementations MUST NOT panic.
//! - The registry holds no lock while `run` is awaited.

use std::fmt;

use async_trait::async_trait;

use crate::model::OptimizationTask;

/// Failure reported by a [`TaskRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRunError(pub String);

impl fmt::Display for TaskRunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task run failed: {}", self.0)
    }
}

impl std::error::Error for TaskRunError {}

/// Async executor for the work behind an [`OptimizationTask`].
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Perform the task's work. The task is already in `processing`.
    async fn run(&self, task: &OptimizationTask) -> Result<(), TaskRunError>;
}

/// Runner that completes every task immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstantRunner;

#[async_trait]
impl TaskRunner for InstantRunner {
    async fn run(&self, _task: &OptimizationTask) -> Result<(), TaskRunError> {
        Ok(())
    }
}
