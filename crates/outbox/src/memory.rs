use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::event::validate_new_event;
use crate::store::{ClaimOutcome, OutboxStore, OutboxTransaction, cutoff};
use crate::{
    EventId, OutboxError, OutboxEvent, OutboxQuery, OutboxStatus, Result, SagaStatusSummary,
};

const RECLAIM_NOTE: &str = "claim expired: processing liveness window elapsed";

#[derive(Default)]
struct Rows {
    events: Vec<OutboxEvent>,
    next_id: i64,
}

impl Rows {
    fn find_mut(&mut self, event_id: EventId) -> Result<&mut OutboxEvent> {
        self.events
            .iter_mut()
            .find(|e| e.event_id == event_id)
            .ok_or(OutboxError::EventNotFound(event_id))
    }

    fn contains(&self, event_id: EventId) -> bool {
        self.events.iter().any(|e| e.event_id == event_id)
    }
}

fn sorted_oldest_first(mut events: Vec<OutboxEvent>) -> Vec<OutboxEvent> {
    events.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    events
}

/// In-memory outbox store for tests and single-process development.
///
/// Cloning yields another handle to the same rows, so several relay workers
/// can share one store exactly as they would share a database.
#[derive(Clone, Default)]
pub struct InMemoryOutboxStore {
    rows: Arc<RwLock<Rows>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of committed rows.
    pub async fn event_count(&self) -> usize {
        self.rows.read().await.events.len()
    }

    /// Looks up a committed row by event id.
    pub async fn get_event(&self, event_id: EventId) -> Option<OutboxEvent> {
        self.rows
            .read()
            .await
            .events
            .iter()
            .find(|e| e.event_id == event_id)
            .cloned()
    }

    /// Overwrites the relay timestamps of a row. Lets tests age rows past
    /// backoff and liveness windows without sleeping.
    pub async fn backdate(
        &self,
        event_id: EventId,
        by: Duration,
    ) -> Result<()> {
        let mut rows = self.rows.write().await;
        let event = rows.find_mut(event_id)?;
        let shift = |t: chrono::DateTime<Utc>| cutoff(t, by);
        event.created_at = shift(event.created_at);
        event.last_retry_at = event.last_retry_at.map(shift);
        event.claimed_at = event.claimed_at.map(shift);
        Ok(())
    }

    async fn claim(&self, event_id: EventId, from: OutboxStatus) -> Result<ClaimOutcome> {
        let mut rows = self.rows.write().await;
        let event = rows.find_mut(event_id)?;
        if event.status != from {
            return Ok(ClaimOutcome::AlreadyClaimed);
        }
        event.status = OutboxStatus::Processing;
        event.claimed_at = Some(Utc::now());
        Ok(ClaimOutcome::Claimed)
    }
}

/// Transaction over an [`InMemoryOutboxStore`].
///
/// Saved rows are buffered and appended atomically on commit.
pub struct InMemoryTransaction {
    store: InMemoryOutboxStore,
    buffered: Vec<OutboxEvent>,
}

impl InMemoryTransaction {
    /// Rows saved so far and not yet committed.
    pub fn buffered(&self) -> &[OutboxEvent] {
        &self.buffered
    }
}

#[async_trait]
impl OutboxTransaction for InMemoryTransaction {
    async fn save(&mut self, event: OutboxEvent) -> Result<()> {
        validate_new_event(&event)?;
        if self.buffered.iter().any(|e| e.event_id == event.event_id)
            || self.store.rows.read().await.contains(event.event_id)
        {
            return Err(OutboxError::DuplicateEvent(event.event_id));
        }
        self.buffered.push(event);
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        let mut rows = self.store.rows.write().await;

        // Unique constraint on event_id, checked again under the write lock.
        if let Some(dup) = self.buffered.iter().find(|e| rows.contains(e.event_id)) {
            return Err(OutboxError::DuplicateEvent(dup.event_id));
        }

        for mut event in self.buffered {
            rows.next_id += 1;
            event.id = rows.next_id;
            rows.events.push(event);
        }
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    type Transaction = InMemoryTransaction;

    async fn begin(&self) -> Result<Self::Transaction> {
        Ok(InMemoryTransaction {
            store: self.clone(),
            buffered: Vec::new(),
        })
    }

    async fn get_pending_events(&self, limit: usize) -> Result<Vec<OutboxEvent>> {
        let rows = self.rows.read().await;
        let pending = rows
            .events
            .iter()
            .filter(|e| e.status == OutboxStatus::Pending)
            .cloned()
            .collect();
        Ok(sorted_oldest_first(pending).into_iter().take(limit).collect())
    }

    async fn mark_as_processing(&self, event_id: EventId) -> Result<ClaimOutcome> {
        self.claim(event_id, OutboxStatus::Pending).await
    }

    async fn claim_for_retry(&self, event_id: EventId) -> Result<ClaimOutcome> {
        self.claim(event_id, OutboxStatus::Failed).await
    }

    async fn mark_as_processed(&self, event_id: EventId) -> Result<()> {
        let mut rows = self.rows.write().await;
        let event = rows.find_mut(event_id)?;
        event.status = OutboxStatus::Processed;
        event.processed_at = Some(Utc::now());
        event.claimed_at = None;
        Ok(())
    }

    async fn mark_as_failed(&self, event_id: EventId, error_message: &str) -> Result<()> {
        let mut rows = self.rows.write().await;
        let event = rows.find_mut(event_id)?;
        // A late failure from a worker whose claim was reclaimed must not
        // undo another worker's delivery.
        if event.status == OutboxStatus::Processed {
            return Ok(());
        }
        event.status = OutboxStatus::Failed;
        event.retry_count += 1;
        event.last_error = Some(error_message.to_string());
        event.last_retry_at = Some(Utc::now());
        event.claimed_at = None;
        Ok(())
    }

    async fn get_failed_events_for_retry(
        &self,
        max_retries: i32,
        retry_backoff: Duration,
        limit: usize,
    ) -> Result<Vec<OutboxEvent>> {
        let due_before = cutoff(Utc::now(), retry_backoff);
        let rows = self.rows.read().await;
        let eligible = rows
            .events
            .iter()
            .filter(|e| {
                e.status == OutboxStatus::Failed
                    && e.retry_count < max_retries
                    && e.last_retry_at.is_none_or(|t| t <= due_before)
            })
            .cloned()
            .collect();
        Ok(sorted_oldest_first(eligible).into_iter().take(limit).collect())
    }

    async fn reclaim_stale_processing(&self, liveness_window: Duration) -> Result<u64> {
        let stale_before = cutoff(Utc::now(), liveness_window);
        let mut rows = self.rows.write().await;
        let mut reclaimed = 0;
        for event in rows.events.iter_mut().filter(|e| {
            e.status == OutboxStatus::Processing && e.claimed_at.is_none_or(|t| t <= stale_before)
        }) {
            event.status = OutboxStatus::Pending;
            event.claimed_at = None;
            event.last_error = Some(RECLAIM_NOTE.to_string());
            reclaimed += 1;
        }
        Ok(reclaimed)
    }

    async fn count_pending(&self) -> Result<u64> {
        let rows = self.rows.read().await;
        Ok(rows
            .events
            .iter()
            .filter(|e| e.status == OutboxStatus::Pending)
            .count() as u64)
    }

    async fn count_failed(&self) -> Result<u64> {
        let rows = self.rows.read().await;
        Ok(rows
            .events
            .iter()
            .filter(|e| e.status == OutboxStatus::Failed)
            .count() as u64)
    }

    async fn get_saga_events(&self, correlation_id: &str) -> Result<Vec<OutboxEvent>> {
        let rows = self.rows.read().await;
        let events = rows
            .events
            .iter()
            .filter(|e| e.correlation_id() == Some(correlation_id))
            .cloned()
            .collect();
        Ok(sorted_oldest_first(events))
    }

    async fn get_saga_status(&self, correlation_id: &str) -> Result<SagaStatusSummary> {
        let rows = self.rows.read().await;
        Ok(SagaStatusSummary::from_statuses(
            rows.events
                .iter()
                .filter(|e| e.correlation_id() == Some(correlation_id))
                .map(|e| e.status),
        ))
    }

    async fn query_events(&self, query: OutboxQuery) -> Result<Vec<OutboxEvent>> {
        let rows = self.rows.read().await;
        let matching = rows
            .events
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        let events = sorted_oldest_first(matching)
            .into_iter()
            .skip(query.offset.unwrap_or(0));
        Ok(match query.limit {
            Some(limit) => events.take(limit).collect(),
            None => events.collect(),
        })
    }
}
