//! Saga error types.

use std::time::Duration;

use outbox::OutboxError;
use thiserror::Error;

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// No outbox rows carry the correlation id.
    #[error("Saga not found: {0}")]
    SagaNotFound(String),

    /// Compensation was requested for a saga type with no registered handler.
    #[error("No compensation handler registered for saga type '{0}'")]
    NoCompensationHandler(String),

    /// A saga type name outside the catalogue.
    #[error("Unknown saga type: {0}")]
    UnknownSagaType(String),

    /// One compensation action failed; the remaining ones were not run.
    #[error("Compensation step {position} ({event_type}) failed: {source}")]
    CompensationStepFailed {
        /// Index of the action in chronological order of the original events.
        position: usize,
        /// Event type of the original event being undone.
        event_type: String,
        #[source]
        source: Box<SagaError>,
    },

    /// A dispatcher could not emit a compensation event.
    #[error("Compensation dispatch failed: {0}")]
    CompensationDispatch(String),

    /// The saga reached the `failed` status while being waited on.
    #[error("Saga {correlation_id} failed with {failed_steps} failed step(s)")]
    SagaFailed {
        correlation_id: String,
        failed_steps: u64,
    },

    /// The saga did not finish before the deadline.
    #[error("Timed out after {timeout:?} waiting for saga {correlation_id}")]
    Timeout {
        correlation_id: String,
        timeout: Duration,
    },

    /// The wait was cancelled by the caller.
    #[error("Wait for saga {0} was cancelled")]
    Cancelled(String),

    /// Outbox store error.
    #[error("Outbox error: {0}")]
    Outbox(#[from] OutboxError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
