//! Saga error types.

use common::{SagaId, Version};
use thiserror::Error;

/// Errors that escape the orchestrator's event-handling entry point.
///
/// Expected protocol anomalies (unknown correlation keys, duplicates, events
/// with no edge from the current state) are never errors; they are reported
/// through `HandleOutcome`. What remains here means the input was not applied
/// and its delivery should be retried.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The saga store could not be read or written.
    #[error("Repository error: {0}")]
    Repository(String),

    /// Another writer saved the saga between our load and our save.
    #[error(
        "Concurrency conflict for saga {saga_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        saga_id: SagaId,
        expected: Version,
        actual: Version,
    },

    /// The dispatcher could not hand a forward command to its service.
    #[error("Dispatch of '{command}' failed: {reason}")]
    Dispatch {
        command: &'static str,
        reason: String,
    },

    /// The deadline scheduler is unavailable.
    #[error("Deadline scheduler error: {0}")]
    Scheduler(String),

    /// The correlation index could not be read or written.
    #[error("Correlation index error: {0}")]
    CorrelationIndex(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The inbound event stream yielded an error.
    #[error("Event source error: {0}")]
    Source(String),

    /// The runtime has shut down and no longer accepts input.
    #[error("Saga runtime is shut down")]
    Shutdown,
}

impl SagaError {
    /// Returns true if redelivering the same input may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SagaError::Repository(_)
                | SagaError::ConcurrencyConflict { .. }
                | SagaError::Dispatch { .. }
                | SagaError::Scheduler(_)
                | SagaError::CorrelationIndex(_)
        )
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
