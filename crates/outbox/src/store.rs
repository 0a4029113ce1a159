use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

use crate::{EventId, OutboxEvent, OutboxQuery, Result, SagaStatusSummary};

/// Outcome of an optimistic claim on a row.
///
/// Losing the race is an expected branch under concurrent relays, so it is a
/// value the caller must match on rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum ClaimOutcome {
    /// The row moved to `processing` and belongs to the caller.
    Claimed,
    /// The row was not in the expected state; skip it.
    AlreadyClaimed,
}

impl ClaimOutcome {
    pub fn is_claimed(&self) -> bool {
        matches!(self, ClaimOutcome::Claimed)
    }
}

/// Producer-side unit of work.
///
/// Rows saved through a transaction become visible to the relay only after
/// [`commit`](OutboxTransaction::commit). A rollback, or dropping the
/// transaction without committing, leaves no trace of them.
#[async_trait]
pub trait OutboxTransaction: Send {
    /// Inserts one new row as part of this transaction.
    async fn save(&mut self, event: OutboxEvent) -> Result<()>;

    /// Inserts several rows in order.
    async fn save_all(&mut self, events: Vec<OutboxEvent>) -> Result<()> {
        for event in events {
            self.save(event).await?;
        }
        Ok(())
    }

    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}

/// Durable store of outbox rows and the only place their status changes.
///
/// All implementations must be thread-safe (Send + Sync) and safe to share
/// between several relay workers: claims are serialized by the store.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    type Transaction: OutboxTransaction;

    /// Opens a producer transaction.
    async fn begin(&self) -> Result<Self::Transaction>;

    /// Up to `limit` `pending` rows, oldest first.
    async fn get_pending_events(&self, limit: usize) -> Result<Vec<OutboxEvent>>;

    /// `pending → processing`. Any other current status yields
    /// [`ClaimOutcome::AlreadyClaimed`].
    async fn mark_as_processing(&self, event_id: EventId) -> Result<ClaimOutcome>;

    /// `failed → processing`, the retry-phase counterpart of
    /// [`mark_as_processing`](OutboxStore::mark_as_processing).
    async fn claim_for_retry(&self, event_id: EventId) -> Result<ClaimOutcome>;

    /// Moves the row to `processed` and stamps the processed time.
    async fn mark_as_processed(&self, event_id: EventId) -> Result<()>;

    /// Moves the row to `failed`, increments the retry count and records the
    /// error and the attempt time.
    async fn mark_as_failed(&self, event_id: EventId, error_message: &str) -> Result<()>;

    /// `failed` rows with fewer than `max_retries` attempts whose last attempt
    /// is at least `retry_backoff` old, oldest first.
    ///
    /// This is the only place retry eligibility is decided.
    async fn get_failed_events_for_retry(
        &self,
        max_retries: i32,
        retry_backoff: Duration,
        limit: usize,
    ) -> Result<Vec<OutboxEvent>>;

    /// Returns `processing` rows claimed longer than `liveness_window` ago to
    /// `pending`, leaving their retry count untouched. Returns how many rows
    /// were released.
    async fn reclaim_stale_processing(&self, liveness_window: Duration) -> Result<u64>;

    async fn count_pending(&self) -> Result<u64>;

    async fn count_failed(&self) -> Result<u64>;

    /// Every row (any status) carrying the correlation id, oldest first.
    async fn get_saga_events(&self, correlation_id: &str) -> Result<Vec<OutboxEvent>>;

    /// Aggregate `(status, total, completed)` for the correlation id.
    async fn get_saga_status(&self, correlation_id: &str) -> Result<SagaStatusSummary>;

    /// Rows matching a scoped query, oldest first.
    async fn query_events(&self, query: OutboxQuery) -> Result<Vec<OutboxEvent>>;
}

/// Convenience methods for outbox stores.
#[async_trait]
pub trait OutboxStoreExt: OutboxStore {
    /// Writes rows in a transaction of their own.
    ///
    /// For rows that have no accompanying aggregate mutation, such as
    /// compensation events.
    async fn save_standalone(&self, events: Vec<OutboxEvent>) -> Result<()> {
        let mut tx = self.begin().await?;
        tx.save_all(events).await?;
        tx.commit().await
    }
}

impl<T: OutboxStore + ?Sized> OutboxStoreExt for T {}

/// `now - window`, saturating at the earliest representable instant.
pub(crate) fn cutoff(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(window)
        .ok()
        .and_then(|delta| now.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
