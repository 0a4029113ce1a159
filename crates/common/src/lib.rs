//! Shared types for the outbox relay and saga core.

pub mod event_types;
pub mod types;

pub use event_types::{CompensationEventType, DomainEventType, UnknownEventType};
pub use types::AggregateId;
