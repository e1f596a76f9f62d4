//! Registration-time error taxonomy
//!
//! These errors are returned synchronously to whoever registers a task or
//! loads a persona. Execution-time problems never surface here: they are
//! recorded as an [`Outcome`](crate::agent::Outcome) on the execution record.

use thiserror::Error;

use crate::agent::TaskId;
use crate::character::SchemaError;
use crate::engagement::StoreError;

/// Orchestrator errors
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Invalid cadence for {task}: {reason}")]
    InvalidCadence { task: String, reason: String },

    #[error("Task already registered: {0}")]
    DuplicateTask(TaskId),

    #[error("Unknown task: {0}")]
    UnknownTask(TaskId),

    #[error("Persona schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Engagement store error: {0}")]
    Store(#[from] StoreError),
}

impl OrchestratorError {
    pub(crate) fn invalid_cadence(task: impl ToString, reason: impl ToString) -> Self {
        Self::InvalidCadence {
            task: task.to_string(),
            reason: reason.to_string(),
        }
    }
}
