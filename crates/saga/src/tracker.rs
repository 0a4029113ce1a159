//! Saga state reconstructed from outbox rows.
//!
//! Nothing here is stored. Every view is recomputed from the rows that carry
//! the correlation id, so it cannot drift from the outbox.

use std::time::Duration;

use chrono::{DateTime, Utc};
use outbox::{EventId, OutboxEvent, OutboxStatus, OutboxStore, SagaStatus};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SagaError};
use crate::saga_type::SagaType;

/// Snapshot of one saga execution.
#[derive(Debug, Clone, Serialize)]
pub struct SagaExecution {
    pub correlation_id: String,
    /// Saga type recorded on the rows, as written.
    pub saga_type: Option<String>,
    pub status: SagaStatus,
    pub total_steps: u64,
    pub completed_steps: u64,
    pub failed_steps: u64,
    pub started_at: DateTime<Utc>,
    /// Latest processed or failed time, set once the saga is terminal.
    pub completed_at: Option<DateTime<Utc>>,
    /// Start to completion, or start to now while in progress.
    pub duration_ms: i64,
    #[serde(skip)]
    pub events: Vec<OutboxEvent>,
}

impl SagaExecution {
    /// Builds the snapshot from a saga's rows and the store's aggregate.
    /// `None` when there are no rows.
    fn from_rows(
        correlation_id: &str,
        status: SagaStatus,
        total: u64,
        completed: u64,
        events: Vec<OutboxEvent>,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        let started_at = events.iter().map(|e| e.created_at).min()?;
        let failed_steps = events
            .iter()
            .filter(|e| e.status == OutboxStatus::Failed)
            .count() as u64;
        let completed_at = if status.is_terminal() {
            events.iter().filter_map(OutboxEvent::finished_at).max()
        } else {
            None
        };
        let saga_type = events
            .iter()
            .find_map(|e| e.saga_type())
            .map(str::to_string);
        let duration_ms = (completed_at.unwrap_or(now) - started_at).num_milliseconds();

        Some(Self {
            correlation_id: correlation_id.to_string(),
            saga_type,
            status,
            total_steps: total,
            completed_steps: completed,
            failed_steps,
            started_at,
            completed_at,
            duration_ms,
            events,
        })
    }

    /// The recorded saga type, if it is part of the catalogue.
    pub fn known_saga_type(&self) -> Option<SagaType> {
        self.saga_type.as_deref()?.parse().ok()
    }

    pub fn is_completed(&self) -> bool {
        self.status == SagaStatus::Completed
            && self.total_steps > 0
            && self.completed_steps == self.total_steps
    }

    pub fn is_failed(&self) -> bool {
        self.status == SagaStatus::Failed
    }

    pub fn failed_events(&self) -> Vec<OutboxEvent> {
        self.events
            .iter()
            .filter(|e| e.status == OutboxStatus::Failed)
            .cloned()
            .collect()
    }

    pub fn timeline(&self) -> Vec<TimelineEntry> {
        self.events.iter().map(TimelineEntry::from).collect()
    }

    /// Observed step labels that are not in the saga type's canonical list.
    ///
    /// Diagnostic only. Empty when the saga type is unknown.
    pub fn deviations(&self) -> Vec<String> {
        let Some(saga_type) = self.known_saga_type() else {
            return Vec::new();
        };
        let expected = saga_type.expected_steps();
        self.events
            .iter()
            .filter_map(|e| e.saga_step())
            .filter(|step| !expected.contains(step))
            .map(str::to_string)
            .collect()
    }
}

/// One row of a saga's execution timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEntry {
    pub step_number: Option<i64>,
    pub step: Option<String>,
    pub event_id: EventId,
    pub event_type: String,
    pub status: OutboxStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub error: Option<String>,
}

impl From<&OutboxEvent> for TimelineEntry {
    fn from(event: &OutboxEvent) -> Self {
        Self {
            step_number: event.step_number(),
            step: event.saga_step().map(str::to_string),
            event_id: event.event_id,
            event_type: event.event_type.clone(),
            status: event.status,
            created_at: event.created_at,
            processed_at: event.processed_at,
            last_retry_at: event.last_retry_at,
            retry_count: event.retry_count,
            error: event.last_error.clone(),
        }
    }
}

/// Read-side view of sagas over an outbox store.
#[derive(Debug, Clone)]
pub struct SagaTracker<S> {
    store: S,
}

impl<S: OutboxStore> SagaTracker<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Reconstructs the execution for a correlation id.
    #[tracing::instrument(skip(self))]
    pub async fn track_saga(&self, correlation_id: &str) -> Result<SagaExecution> {
        let events = self.store.get_saga_events(correlation_id).await?;
        if events.is_empty() {
            return Err(SagaError::SagaNotFound(correlation_id.to_string()));
        }
        let summary = self.store.get_saga_status(correlation_id).await?;

        SagaExecution::from_rows(
            correlation_id,
            summary.status,
            summary.total,
            summary.completed,
            events,
            Utc::now(),
        )
        .ok_or_else(|| SagaError::SagaNotFound(correlation_id.to_string()))
    }

    /// True only when the saga has rows and all of them are processed.
    pub async fn is_completed(&self, correlation_id: &str) -> Result<bool> {
        let summary = self.store.get_saga_status(correlation_id).await?;
        Ok(summary.status == SagaStatus::Completed
            && summary.total > 0
            && summary.completed == summary.total)
    }

    pub async fn is_failed(&self, correlation_id: &str) -> Result<bool> {
        let summary = self.store.get_saga_status(correlation_id).await?;
        Ok(summary.status == SagaStatus::Failed)
    }

    /// All rows of the saga, oldest first.
    pub async fn get_saga_events(&self, correlation_id: &str) -> Result<Vec<OutboxEvent>> {
        Ok(self.store.get_saga_events(correlation_id).await?)
    }

    pub async fn get_failed_steps(&self, correlation_id: &str) -> Result<Vec<OutboxEvent>> {
        let events = self.store.get_saga_events(correlation_id).await?;
        Ok(events
            .into_iter()
            .filter(|e| e.status == OutboxStatus::Failed)
            .collect())
    }

    pub async fn get_execution_timeline(&self, correlation_id: &str) -> Result<Vec<TimelineEntry>> {
        let events = self.store.get_saga_events(correlation_id).await?;
        if events.is_empty() {
            return Err(SagaError::SagaNotFound(correlation_id.to_string()));
        }
        Ok(events.iter().map(TimelineEntry::from).collect())
    }

    /// Polls until the saga completes, fails, the timeout elapses or
    /// `cancel` fires, whichever comes first.
    ///
    /// A correlation id with no rows yet counts as still in progress, since
    /// producers may not have committed the first step.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn wait_for_completion(
        &self,
        correlation_id: &str,
        timeout: Duration,
        poll_interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<SagaExecution> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            match self.track_saga(correlation_id).await {
                Ok(execution) if execution.is_completed() => return Ok(execution),
                Ok(execution) if execution.is_failed() => {
                    return Err(SagaError::SagaFailed {
                        correlation_id: correlation_id.to_string(),
                        failed_steps: execution.failed_steps,
                    });
                }
                Ok(_) | Err(SagaError::SagaNotFound(_)) => {}
                Err(e) => return Err(e),
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(SagaError::Cancelled(correlation_id.to_string()));
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(SagaError::Timeout {
                        correlation_id: correlation_id.to_string(),
                        timeout,
                    });
                }
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use outbox::{AggregateId, metadata};

    fn row(step: &str, status: OutboxStatus, created_at: DateTime<Utc>) -> OutboxEvent {
        let mut event = OutboxEvent::builder()
            .aggregate_id(AggregateId::new())
            .aggregate_type("contact")
            .event_type("contact.created")
            .payload_bytes(b"{}".to_vec())
            .metadata(metadata::CORRELATION_ID, "c".into())
            .metadata(metadata::SAGA_TYPE, "create_contact_with_session".into())
            .metadata(metadata::SAGA_STEP, step.into())
            .created_at(created_at)
            .build()
            .unwrap();
        event.status = status;
        if status == OutboxStatus::Processed {
            event.processed_at = Some(created_at + TimeDelta::milliseconds(100));
        }
        event
    }

    #[test]
    fn completed_execution_spans_first_created_to_last_processed() {
        let t0 = Utc::now() - TimeDelta::seconds(10);
        let rows = vec![
            row("create_contact", OutboxStatus::Processed, t0),
            row("start_session", OutboxStatus::Processed, t0 + TimeDelta::seconds(1)),
        ];
        let exec =
            SagaExecution::from_rows("c", SagaStatus::Completed, 2, 2, rows, Utc::now()).unwrap();

        assert!(exec.is_completed());
        assert_eq!(exec.started_at, t0);
        assert_eq!(
            exec.completed_at,
            Some(t0 + TimeDelta::seconds(1) + TimeDelta::milliseconds(100))
        );
        assert_eq!(exec.duration_ms, 1100);
        assert_eq!(exec.known_saga_type(), Some(SagaType::CreateContactWithSession));
    }

    #[test]
    fn failed_saga_ends_at_last_failed_attempt() {
        let t0 = Utc::now() - TimeDelta::seconds(10);
        let mut failed = row("create_contact", OutboxStatus::Failed, t0);
        failed.last_retry_at = Some(t0 + TimeDelta::seconds(2));

        let exec =
            SagaExecution::from_rows("c", SagaStatus::Failed, 1, 0, vec![failed], Utc::now())
                .unwrap();
        assert_eq!(exec.completed_at, Some(t0 + TimeDelta::seconds(2)));
        assert_eq!(exec.duration_ms, 2000);

        let later = SagaExecution::from_rows(
            "c",
            SagaStatus::Failed,
            1,
            0,
            exec.events.clone(),
            Utc::now() + TimeDelta::seconds(30),
        )
        .unwrap();
        assert_eq!(later.duration_ms, 2000);
    }

    #[test]
    fn failed_row_after_processed_rows_sets_completion() {
        let t0 = Utc::now() - TimeDelta::seconds(10);
        let mut failed = row(
            "start_session",
            OutboxStatus::Failed,
            t0 + TimeDelta::seconds(1),
        );
        failed.last_retry_at = Some(t0 + TimeDelta::seconds(5));
        let rows = vec![row("create_contact", OutboxStatus::Processed, t0), failed];

        let exec =
            SagaExecution::from_rows("c", SagaStatus::Failed, 2, 1, rows, Utc::now()).unwrap();
        assert_eq!(exec.completed_at, Some(t0 + TimeDelta::seconds(5)));
    }

    #[test]
    fn in_progress_duration_runs_to_now() {
        let t0 = Utc::now() - TimeDelta::seconds(5);
        let now = t0 + TimeDelta::seconds(5);
        let rows = vec![row("create_contact", OutboxStatus::Pending, t0)];
        let exec =
            SagaExecution::from_rows("c", SagaStatus::InProgress, 1, 0, rows, now).unwrap();

        assert_eq!(exec.completed_at, None);
        assert_eq!(exec.duration_ms, 5000);
        assert!(!exec.is_completed());
    }

    #[test]
    fn completion_requires_matching_counts() {
        let rows = vec![row("create_contact", OutboxStatus::Processed, Utc::now())];
        let exec =
            SagaExecution::from_rows("c", SagaStatus::Completed, 2, 1, rows, Utc::now()).unwrap();
        assert!(!exec.is_completed());
    }

    #[test]
    fn no_rows_no_execution() {
        assert!(
            SagaExecution::from_rows("c", SagaStatus::InProgress, 0, 0, vec![], Utc::now())
                .is_none()
        );
    }

    #[test]
    fn deviations_list_unexpected_steps() {
        let t0 = Utc::now();
        let rows = vec![
            row("create_contact", OutboxStatus::Processed, t0),
            row("enrich_contact", OutboxStatus::Pending, t0),
        ];
        let exec =
            SagaExecution::from_rows("c", SagaStatus::InProgress, 2, 1, rows, Utc::now()).unwrap();
        assert_eq!(exec.deviations(), vec!["enrich_contact".to_string()]);
    }

    #[test]
    fn timeline_projects_rows() {
        let t0 = Utc::now();
        let mut failed = row("start_session", OutboxStatus::Failed, t0);
        failed.last_error = Some("broker down".into());
        failed.retry_count = 2;
        let exec = SagaExecution::from_rows(
            "c",
            SagaStatus::Failed,
            1,
            0,
            vec![failed.clone()],
            Utc::now(),
        )
        .unwrap();

        let timeline = exec.timeline();
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline[0].step.as_deref(), Some("start_session"));
        assert_eq!(timeline[0].error.as_deref(), Some("broker down"));
        assert_eq!(timeline[0].retry_count, 2);
        assert_eq!(exec.failed_events(), vec![failed]);
        assert_eq!(exec.failed_steps, 1);
    }
}
