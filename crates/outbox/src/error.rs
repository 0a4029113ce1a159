use thiserror::Error;

use crate::EventId;

/// Errors raised by outbox store operations.
///
/// Optimistic-lock contention on a claim is not an error; see
/// [`ClaimOutcome`](crate::ClaimOutcome).
#[derive(Debug, Error)]
pub enum OutboxError {
    /// The database rejected a read or write.
    #[error("Persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// An event with the same event id is already stored.
    #[error("Duplicate outbox event: {0}")]
    DuplicateEvent(EventId),

    /// No row exists for the given event id.
    #[error("Outbox event not found: {0}")]
    EventNotFound(EventId),

    /// The event is not a valid new outbox row.
    #[error("Invalid outbox event: {0}")]
    Validation(String),

    /// A stored status value could not be parsed.
    #[error("Invalid outbox status: {0}")]
    InvalidStatus(String),

    /// The transaction was already committed or rolled back.
    #[error("Outbox transaction is closed")]
    TransactionClosed,

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OutboxError {
    /// True for failures of the backing store itself (connection loss,
    /// constraint violations). These must abort the producer's transaction.
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            OutboxError::Persistence(_)
                | OutboxError::DuplicateEvent(_)
                | OutboxError::Migration(_)
                | OutboxError::TransactionClosed
        )
    }
}

/// Result type for outbox operations.
pub type Result<T> = std::result::Result<T, OutboxError>;
