//! Compensation of processed saga steps.
//!
//! Each compensation is emitted as a new outbox row of a compensation event
//! type, so the undo path travels with the same at-least-once guarantees as
//! the forward path. Compensation rows reference the saga they undo through
//! the `compensates_*` metadata keys, not the correlation id, which keeps
//! them out of the forward saga's reconstruction.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use common::{CompensationEventType, DomainEventType};
use futures_util::future::join_all;
use outbox::metadata::{self, Metadata};
use outbox::{AggregateId, EventId, OutboxEvent, OutboxStatus, OutboxStore, OutboxStoreExt};
use serde::Serialize;

use crate::coordinator::CompensationHandler;
use crate::error::{Result, SagaError};
use crate::tracker::SagaExecution;

/// Instruction to undo one processed event. Transient; never stored as is.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompensationAction {
    pub compensation_type: CompensationEventType,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    pub reason: String,
    pub original_event_id: EventId,
    pub original_event_type: String,
    pub tenant_id: Option<String>,
    pub project_id: Option<String>,
    pub metadata: Metadata,
}

impl CompensationAction {
    /// Builds the action for `event`, or `None` when its type has no
    /// compensation.
    pub fn for_event(event: &OutboxEvent, correlation_id: &str, reason: &str) -> Option<Self> {
        let compensation_type = event
            .event_type
            .parse::<DomainEventType>()
            .ok()?
            .compensation()?;

        let mut tags = Metadata::new();
        tags.insert(
            metadata::COMPENSATES_CORRELATION_ID.to_string(),
            correlation_id.into(),
        );
        tags.insert(
            metadata::COMPENSATES_EVENT_ID.to_string(),
            event.event_id.to_string().into(),
        );
        if let Some(saga_type) = event.saga_type() {
            tags.insert(metadata::SAGA_TYPE.to_string(), saga_type.into());
        }

        Some(Self {
            compensation_type,
            aggregate_id: event.aggregate_id,
            aggregate_type: event.aggregate_type.clone(),
            reason: reason.to_string(),
            original_event_id: event.event_id,
            original_event_type: event.event_type.clone(),
            tenant_id: event.tenant_id.clone(),
            project_id: event.project_id.clone(),
            metadata: tags,
        })
    }

    /// The outbox row that carries this compensation.
    pub fn to_outbox_event(&self) -> Result<OutboxEvent> {
        let payload = serde_json::json!({
            "aggregate_id": self.aggregate_id,
            "aggregate_type": self.aggregate_type,
            "reason": self.reason,
            "original_event_id": self.original_event_id,
            "original_event_type": self.original_event_type,
        });

        let mut builder = OutboxEvent::builder()
            .aggregate_id(self.aggregate_id)
            .aggregate_type(self.aggregate_type.as_str())
            .event_type(self.compensation_type.as_str())
            .payload(&payload)?;
        for (key, value) in &self.metadata {
            builder = builder.metadata(key.as_str(), value.clone());
        }
        if let Some(ref tenant_id) = self.tenant_id {
            builder = builder.tenant_id(tenant_id.as_str());
        }
        if let Some(ref project_id) = self.project_id {
            builder = builder.project_id(project_id.as_str());
        }
        Ok(builder.build()?)
    }
}

/// How the action list is dispatched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationStrategy {
    /// Most recent effect first; stops at the first failure.
    #[default]
    ReverseOrder,
    /// Everything concurrently; only for mutually independent compensations.
    AllAtOnce,
    /// Only events accepted by the selector, in reverse order.
    Selective,
}

/// Predicate choosing which processed events to compensate.
pub type Selector = Arc<dyn Fn(&OutboxEvent) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct CompensationConfig {
    pub strategy: CompensationStrategy,
    pub selector: Option<Selector>,
    pub reason: String,
}

impl Default for CompensationConfig {
    fn default() -> Self {
        Self {
            strategy: CompensationStrategy::ReverseOrder,
            selector: None,
            reason: "saga compensation".to_string(),
        }
    }
}

impl std::fmt::Debug for CompensationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompensationConfig")
            .field("strategy", &self.strategy)
            .field("selector", &self.selector.is_some())
            .field("reason", &self.reason)
            .finish()
    }
}

impl CompensationConfig {
    pub fn reverse_order() -> Self {
        Self::default()
    }

    pub fn all_at_once() -> Self {
        Self {
            strategy: CompensationStrategy::AllAtOnce,
            ..Self::default()
        }
    }

    pub fn selective(selector: impl Fn(&OutboxEvent) -> bool + Send + Sync + 'static) -> Self {
        Self {
            strategy: CompensationStrategy::Selective,
            selector: Some(Arc::new(selector)),
            ..Self::default()
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }
}

/// Actions for the processed, compensable events of an execution, in
/// chronological order of the original events.
pub fn build_compensation_actions(
    execution: &SagaExecution,
    config: &CompensationConfig,
) -> Vec<CompensationAction> {
    execution
        .events
        .iter()
        .filter(|e| e.status == OutboxStatus::Processed)
        .filter(|e| config.selector.as_ref().is_none_or(|select| select(*e)))
        .filter_map(|e| CompensationAction::for_event(e, &execution.correlation_id, &config.reason))
        .collect()
}

/// Emits one compensation.
#[async_trait]
pub trait CompensationDispatcher: Send + Sync {
    async fn dispatch(&self, action: &CompensationAction) -> Result<()>;
}

/// Dispatches compensations as new outbox rows, each in its own transaction.
#[derive(Debug, Clone)]
pub struct OutboxCompensationDispatcher<S> {
    store: S,
}

impl<S: OutboxStore> OutboxCompensationDispatcher<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: OutboxStore> CompensationDispatcher for OutboxCompensationDispatcher<S> {
    async fn dispatch(&self, action: &CompensationAction) -> Result<()> {
        let event = action.to_outbox_event()?;
        self.store.save_standalone(vec![event]).await?;
        Ok(())
    }
}

/// Runs compensation plans against a dispatcher.
#[derive(Clone)]
pub struct CompensationExecutor {
    dispatcher: Arc<dyn CompensationDispatcher>,
}

impl std::fmt::Debug for CompensationExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompensationExecutor").finish_non_exhaustive()
    }
}

impl CompensationExecutor {
    pub fn new(dispatcher: Arc<dyn CompensationDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Compensates an execution. Returns how many actions were dispatched.
    #[tracing::instrument(
        skip(self, execution, config),
        fields(correlation_id = %execution.correlation_id, strategy = ?config.strategy)
    )]
    pub async fn execute(
        &self,
        execution: &SagaExecution,
        config: &CompensationConfig,
    ) -> Result<usize> {
        let actions = build_compensation_actions(execution, config);
        if actions.is_empty() {
            tracing::info!("Nothing to compensate");
            return Ok(0);
        }

        let saga_type = execution.saga_type.clone().unwrap_or_default();
        metrics::counter!("saga_compensations_total", "saga_type" => saga_type.clone())
            .increment(1);
        tracing::info!(actions = actions.len(), "Starting compensation");
        let started = Instant::now();

        let result = match config.strategy {
            CompensationStrategy::ReverseOrder | CompensationStrategy::Selective => {
                self.dispatch_in_reverse(&actions).await
            }
            CompensationStrategy::AllAtOnce => self.dispatch_all(&actions).await,
        };

        metrics::histogram!("saga_compensation_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        match result {
            Ok(()) => {
                tracing::info!(actions = actions.len(), "Compensation finished");
                Ok(actions.len())
            }
            Err(e) => {
                metrics::counter!("saga_compensation_failures_total", "saga_type" => saga_type)
                    .increment(1);
                tracing::error!(error = %e, "Compensation failed");
                Err(e)
            }
        }
    }

    async fn dispatch_in_reverse(&self, actions: &[CompensationAction]) -> Result<()> {
        for (position, action) in actions.iter().enumerate().rev() {
            tracing::debug!(
                position,
                compensation_type = %action.compensation_type,
                original_event_id = %action.original_event_id,
                "Dispatching compensation"
            );
            self.dispatcher
                .dispatch(action)
                .await
                .map_err(|e| step_failed(position, action, e))?;
        }
        Ok(())
    }

    async fn dispatch_all(&self, actions: &[CompensationAction]) -> Result<()> {
        let results = join_all(actions.iter().map(|a| self.dispatcher.dispatch(a))).await;
        for (position, (action, result)) in actions.iter().zip(results).enumerate() {
            result.map_err(|e| step_failed(position, action, e))?;
        }
        Ok(())
    }
}

fn step_failed(position: usize, action: &CompensationAction, source: SagaError) -> SagaError {
    SagaError::CompensationStepFailed {
        position,
        event_type: action.original_event_type.clone(),
        source: Box::new(source),
    }
}

/// Coordinator handler that runs an executor with a fixed configuration.
#[derive(Debug, Clone)]
pub struct ExecutorCompensationHandler {
    executor: CompensationExecutor,
    config: CompensationConfig,
}

impl ExecutorCompensationHandler {
    pub fn new(executor: CompensationExecutor, config: CompensationConfig) -> Self {
        Self { executor, config }
    }
}

#[async_trait]
impl CompensationHandler for ExecutorCompensationHandler {
    async fn compensate(&self, execution: &SagaExecution) -> Result<()> {
        self.executor.execute(execution, &self.config).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, Utc};
    use outbox::SagaStatus;

    fn row(event_type: &str, status: OutboxStatus, offset_ms: i64) -> OutboxEvent {
        let mut event = OutboxEvent::builder()
            .aggregate_id(AggregateId::new())
            .aggregate_type("contact")
            .event_type(event_type)
            .payload_bytes(b"{}".to_vec())
            .metadata(metadata::CORRELATION_ID, "corr-1".into())
            .tenant_id("tenant-1")
            .created_at(Utc::now() + TimeDelta::milliseconds(offset_ms))
            .build()
            .unwrap();
        event.status = status;
        event
    }

    fn execution(events: Vec<OutboxEvent>) -> SagaExecution {
        SagaExecution {
            correlation_id: "corr-1".into(),
            saga_type: Some("process_inbound_message".into()),
            status: SagaStatus::Failed,
            total_steps: events.len() as u64,
            completed_steps: 0,
            failed_steps: 0,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: 0,
            events,
        }
    }

    #[test]
    fn only_processed_mapped_events_become_actions() {
        let exec = execution(vec![
            row("contact.created", OutboxStatus::Processed, 0),
            row("contact.updated", OutboxStatus::Processed, 1),
            row("session.started", OutboxStatus::Processed, 2),
            row("message.created", OutboxStatus::Failed, 3),
            row("agent.assigned", OutboxStatus::Pending, 4),
        ]);

        let actions = build_compensation_actions(&exec, &CompensationConfig::default());

        let types: Vec<_> = actions.iter().map(|a| a.compensation_type).collect();
        assert_eq!(
            types,
            vec![
                CompensationEventType::DeleteContact,
                CompensationEventType::CloseSession
            ]
        );
    }

    #[test]
    fn selector_filters_actions() {
        let exec = execution(vec![
            row("contact.created", OutboxStatus::Processed, 0),
            row("session.started", OutboxStatus::Processed, 1),
        ]);
        let config = CompensationConfig::selective(|e| e.event_type == "session.started");

        let actions = build_compensation_actions(&exec, &config);

        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].original_event_type, "session.started");
    }

    #[test]
    fn action_metadata_traces_back_to_the_saga() {
        let original = row("contact.created", OutboxStatus::Processed, 0);
        let action = CompensationAction::for_event(&original, "corr-1", "rollback").unwrap();
        let event = action.to_outbox_event().unwrap();

        assert_eq!(event.event_type, "contact.compensation.delete");
        assert_eq!(event.aggregate_id, original.aggregate_id);
        assert_eq!(event.tenant_id.as_deref(), Some("tenant-1"));
        assert_eq!(event.correlation_id(), None);
        assert_eq!(
            metadata::get_str(&event.metadata, metadata::COMPENSATES_CORRELATION_ID),
            Some("corr-1")
        );
        let payload = event.payload_json().unwrap();
        assert_eq!(payload["reason"], "rollback");
        assert_eq!(payload["original_event_type"], "contact.created");
    }

    #[test]
    fn unmapped_event_has_no_action() {
        let event = row("message.read", OutboxStatus::Processed, 0);
        assert!(CompensationAction::for_event(&event, "corr-1", "r").is_none());
    }
}
