//! Relay error types.

use outbox::OutboxError;
use thiserror::Error;

/// Failure of one outbound delivery.
///
/// Recorded on the row via `mark_as_failed`; never a process-level fault.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The message transport rejected or could not accept the message.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A webhook endpoint could not be notified.
    #[error("Webhook error: {0}")]
    Webhook(String),
}

/// Errors that abort a relay iteration.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The outbox store failed; surfaced to the caller, never swallowed.
    #[error("Outbox store error: {0}")]
    Store(#[from] OutboxError),
}

/// Convenience type alias for relay results.
pub type Result<T> = std::result::Result<T, RelayError>;
