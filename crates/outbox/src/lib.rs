//! Transactional outbox store.
//!
//! Producers write outbox rows inside the same transaction as the aggregate
//! mutation that produced them ([`OutboxStore::begin`] / [`OutboxTransaction`]).
//! The relay later claims, publishes and marks those rows; the saga layer
//! reads them back by correlation id.
//!
//! Status machine of a row:
//!
//! ```text
//! pending ──► processing ──┬──► processed
//!    ▲            │        └──► failed ──► processing (retry) ──► ...
//!    └────────────┘ (stale claim reclaimed after the liveness window)
//! ```

pub mod error;
pub mod event;
pub mod memory;
pub mod metadata;
pub mod postgres;
pub mod query;
pub mod status;
pub mod store;

pub use common::AggregateId;
pub use error::{OutboxError, Result};
pub use event::{EventId, OutboxEvent, OutboxEventBuilder, OutboxStatus};
pub use memory::{InMemoryOutboxStore, InMemoryTransaction};
pub use postgres::{PostgresOutboxStore, PostgresTransaction};
pub use query::OutboxQuery;
pub use status::{SagaStatus, SagaStatusSummary};
pub use store::{ClaimOutcome, OutboxStore, OutboxStoreExt, OutboxTransaction};
