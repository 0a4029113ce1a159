//! The relay loop.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use outbox::{ClaimOutcome, OutboxEvent, OutboxStore};
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::RelayConfig;
use crate::error::Result;
use crate::publisher::MessagePublisher;
use crate::webhook::{WebhookNotifier, business_events};

/// Counts of what one iteration did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IterationReport {
    /// Stale `processing` rows handed back to `pending`.
    pub reclaimed: u64,
    /// Rows published and marked `processed`, both phases.
    pub published: usize,
    /// Rows marked `failed`, both phases.
    pub failed: usize,
    /// Claims lost to another worker.
    pub conflicts: usize,
    /// Failed rows claimed again by the retry phase.
    pub retried: usize,
}

impl IterationReport {
    /// True when the iteration found nothing to do.
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

/// Backlog figures for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RelayHealth {
    pub pending: u64,
    pub failed: u64,
}

/// Moves outbox rows to the message transport.
///
/// Each iteration first reclaims stale claims, then runs the pending phase and
/// the retry phase. Publish failures are recorded on the row and never stop
/// the loop; store failures end the iteration and are reported to the caller.
#[derive(Clone)]
pub struct RelayProcessor<S> {
    store: S,
    publisher: Arc<dyn MessagePublisher>,
    notifier: Arc<dyn WebhookNotifier>,
    config: RelayConfig,
}

impl<S: OutboxStore> RelayProcessor<S> {
    pub fn new(
        store: S,
        publisher: Arc<dyn MessagePublisher>,
        notifier: Arc<dyn WebhookNotifier>,
        config: RelayConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            notifier,
            config,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Runs iterations until `shutdown` is cancelled.
    ///
    /// Cancellation is observed between iterations, so rows claimed by the
    /// current iteration are always finished before the loop exits.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            max_retries = self.config.max_retries,
            "Relay processor started"
        );

        while !shutdown.is_cancelled() {
            match self.run_iteration().await {
                Ok(report) if report.is_idle() => {}
                Ok(report) => tracing::debug!(?report, "Relay iteration finished"),
                Err(e) => tracing::error!(error = %e, "Relay iteration failed"),
            }

            if let Err(e) = self.health().await {
                tracing::warn!(error = %e, "Failed to refresh outbox backlog gauges");
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        tracing::info!("Relay processor stopped");
    }

    /// One reclaim + pending + retry pass.
    #[tracing::instrument(skip(self))]
    pub async fn run_iteration(&self) -> Result<IterationReport> {
        let started = Instant::now();
        let mut report = IterationReport {
            reclaimed: self
                .store
                .reclaim_stale_processing(self.config.processing_timeout)
                .await?,
            ..Default::default()
        };
        if report.reclaimed > 0 {
            metrics::counter!("outbox_events_reclaimed_total").increment(report.reclaimed);
            tracing::info!(count = report.reclaimed, "Reclaimed stale processing rows");
        }

        // Rows that fail in the pending phase wait for a later iteration.
        let mut failed_now = HashSet::new();

        let pending = self.store.get_pending_events(self.config.batch_size).await?;
        for event in pending {
            match self.store.mark_as_processing(event.event_id).await? {
                ClaimOutcome::Claimed => {
                    if !self.deliver(&event, &mut report).await? {
                        failed_now.insert(event.event_id);
                    }
                }
                ClaimOutcome::AlreadyClaimed => self.record_conflict(&event, &mut report),
            }
        }

        let retryable = self
            .store
            .get_failed_events_for_retry(
                self.config.max_retries,
                self.config.retry_backoff,
                self.config.retry_batch_size,
            )
            .await?;
        for event in retryable {
            if failed_now.contains(&event.event_id) {
                continue;
            }
            match self.store.claim_for_retry(event.event_id).await? {
                ClaimOutcome::Claimed => {
                    report.retried += 1;
                    tracing::debug!(
                        event_id = %event.event_id,
                        retry_count = event.retry_count,
                        "Retrying event"
                    );
                    self.deliver(&event, &mut report).await?;
                }
                ClaimOutcome::AlreadyClaimed => self.record_conflict(&event, &mut report),
            }
        }

        metrics::histogram!("outbox_relay_iteration_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        Ok(report)
    }

    /// Current backlog. Also refreshes the backlog gauges.
    pub async fn health(&self) -> Result<RelayHealth> {
        let pending = self.store.count_pending().await?;
        let failed = self.store.count_failed().await?;
        metrics::gauge!("outbox_pending_events").set(pending as f64);
        metrics::gauge!("outbox_failed_events").set(failed as f64);
        Ok(RelayHealth { pending, failed })
    }

    fn record_conflict(&self, event: &OutboxEvent, report: &mut IterationReport) {
        report.conflicts += 1;
        metrics::counter!("outbox_events_claim_conflicts_total").increment(1);
        tracing::debug!(event_id = %event.event_id, "Row claimed by another worker, skipping");
    }

    /// Publishes a claimed row and records the outcome on it. Returns whether
    /// the publish succeeded.
    async fn deliver(&self, event: &OutboxEvent, report: &mut IterationReport) -> Result<bool> {
        match self
            .publisher
            .publish(&event.event_type, &event.payload)
            .await
        {
            Ok(()) => {
                self.store.mark_as_processed(event.event_id).await?;
                metrics::counter!("outbox_events_published_total").increment(1);
                tracing::debug!(
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    "Event published"
                );
                report.published += 1;
                self.notify_webhooks(event).await;
                Ok(true)
            }
            Err(e) => {
                self.store
                    .mark_as_failed(event.event_id, &e.to_string())
                    .await?;
                metrics::counter!("outbox_events_failed_total").increment(1);
                tracing::warn!(
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    retry_count = event.retry_count + 1,
                    error = %e,
                    "Failed to publish event"
                );
                report.failed += 1;
                Ok(false)
            }
        }
    }

    /// Forwards the decoded payload once per mapped business event.
    async fn notify_webhooks(&self, event: &OutboxEvent) {
        let names = business_events(&event.event_type);
        if names.is_empty() {
            return;
        }

        let payload = match event.payload_json() {
            Ok(payload) => payload,
            Err(e) => {
                metrics::counter!("outbox_webhook_failures_total").increment(1);
                tracing::warn!(
                    event_id = %event.event_id,
                    error = %e,
                    "Payload is not JSON, skipping webhooks"
                );
                return;
            }
        };

        for name in names {
            match self.notifier.notify(name, &payload).await {
                Ok(()) => {
                    metrics::counter!("outbox_webhook_notifications_total").increment(1);
                }
                Err(e) => {
                    metrics::counter!("outbox_webhook_failures_total").increment(1);
                    tracing::warn!(
                        event_id = %event.event_id,
                        business_event = name,
                        error = %e,
                        "Webhook notification failed"
                    );
                }
            }
        }
    }
}

impl<S> RelayProcessor<S>
where
    S: OutboxStore + Clone + 'static,
{
    /// Starts `workers` independent loops over the same store. They all stop
    /// when `shutdown` is cancelled.
    pub fn spawn_workers(&self, workers: usize, shutdown: CancellationToken) -> JoinSet<()> {
        let mut set = JoinSet::new();
        for worker in 0..workers.max(1) {
            let processor = self.clone();
            let shutdown = shutdown.clone();
            set.spawn(
                async move { processor.run(shutdown).await }
                    .instrument(tracing::info_span!("relay_worker", worker)),
            );
        }
        set
    }
}
