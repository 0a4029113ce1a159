//! Saga coordinator: entry point for starting, inspecting and compensating
//! choreography sagas.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use outbox::{OutboxEvent, OutboxStore};
use tokio_util::sync::CancellationToken;

use crate::context::SagaContext;
use crate::error::{Result, SagaError};
use crate::saga_type::SagaType;
use crate::tracker::{SagaExecution, SagaTracker, TimelineEntry};

/// Undoes a saga execution. Registered per saga type.
#[async_trait]
pub trait CompensationHandler: Send + Sync {
    async fn compensate(&self, execution: &SagaExecution) -> Result<()>;
}

/// Thin orchestration over the tracker and the outbox store.
///
/// The handler map is filled once at startup through
/// [`register_compensation_handler`](SagaCoordinator::register_compensation_handler)
/// and only read afterwards.
pub struct SagaCoordinator<S> {
    tracker: SagaTracker<S>,
    handlers: HashMap<SagaType, Arc<dyn CompensationHandler>>,
}

impl<S: OutboxStore> SagaCoordinator<S> {
    pub fn new(store: S) -> Self {
        Self {
            tracker: SagaTracker::new(store),
            handlers: HashMap::new(),
        }
    }

    pub fn tracker(&self) -> &SagaTracker<S> {
        &self.tracker
    }

    /// Starts a saga execution from `ctx` and returns the stamped context.
    pub fn start_saga(
        &self,
        ctx: &SagaContext,
        saga_type: SagaType,
        tenant_id: impl Into<String>,
    ) -> SagaContext {
        let started = ctx.start_saga(saga_type, tenant_id);
        metrics::counter!("saga_started_total", "saga_type" => saga_type.as_str()).increment(1);
        tracing::info!(
            correlation_id = started.correlation_id().unwrap_or_default(),
            %saga_type,
            fast_path = saga_type.is_fast_path(),
            "Saga started"
        );
        started
    }

    /// Adds or replaces the compensation handler for a saga type.
    pub fn register_compensation_handler(
        &mut self,
        saga_type: SagaType,
        handler: Arc<dyn CompensationHandler>,
    ) {
        self.handlers.insert(saga_type, handler);
    }

    pub fn has_compensation_handler(&self, saga_type: SagaType) -> bool {
        self.handlers.contains_key(&saga_type)
    }

    pub async fn track_saga(&self, correlation_id: &str) -> Result<SagaExecution> {
        self.tracker.track_saga(correlation_id).await
    }

    pub async fn is_completed(&self, correlation_id: &str) -> Result<bool> {
        self.tracker.is_completed(correlation_id).await
    }

    pub async fn is_failed(&self, correlation_id: &str) -> Result<bool> {
        self.tracker.is_failed(correlation_id).await
    }

    pub async fn get_saga_events(&self, correlation_id: &str) -> Result<Vec<OutboxEvent>> {
        self.tracker.get_saga_events(correlation_id).await
    }

    pub async fn get_failed_steps(&self, correlation_id: &str) -> Result<Vec<OutboxEvent>> {
        self.tracker.get_failed_steps(correlation_id).await
    }

    pub async fn get_execution_timeline(&self, correlation_id: &str) -> Result<Vec<TimelineEntry>> {
        self.tracker.get_execution_timeline(correlation_id).await
    }

    pub async fn wait_for_completion(
        &self,
        correlation_id: &str,
        timeout: Duration,
        poll_interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<SagaExecution> {
        self.tracker
            .wait_for_completion(correlation_id, timeout, poll_interval, cancel)
            .await
    }

    /// Runs the registered handler for the saga's type on its current
    /// execution snapshot.
    #[tracing::instrument(skip(self))]
    pub async fn compensate_saga(&self, correlation_id: &str) -> Result<()> {
        let execution = self.tracker.track_saga(correlation_id).await?;

        let handler = execution
            .known_saga_type()
            .and_then(|saga_type| self.handlers.get(&saga_type))
            .ok_or_else(|| {
                SagaError::NoCompensationHandler(
                    execution
                        .saga_type
                        .clone()
                        .unwrap_or_else(|| "unknown".to_string()),
                )
            })?;

        tracing::info!(
            saga_type = execution.saga_type.as_deref().unwrap_or_default(),
            status = %execution.status,
            "Compensating saga"
        );
        handler.compensate(&execution).await
    }
}
