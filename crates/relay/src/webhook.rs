//! Webhook notifier boundary and the internal → business event table.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use common::DomainEventType;

use crate::error::PublishError;

/// Externally visible business event names for an internal event type.
///
/// One internal type may fan out to several business events and several
/// internal types may share one. Internal-only types, and types outside the
/// catalogue, map to nothing.
pub fn business_events(event_type: &str) -> &'static [&'static str] {
    let Ok(event_type) = event_type.parse::<DomainEventType>() else {
        return &[];
    };
    match event_type {
        DomainEventType::ContactCreated => &["contact.created"],
        DomainEventType::ContactUpdated | DomainEventType::ContactEnriched => &["contact.updated"],
        DomainEventType::ContactDeleted => &["contact.deleted"],
        DomainEventType::ContactPipelineStatusChanged => {
            &["contact.updated", "pipeline.stage_changed"]
        }
        DomainEventType::SessionStarted => &["conversation.started"],
        DomainEventType::SessionEnded => &["conversation.closed"],
        DomainEventType::MessageCreated => &["message.received"],
        DomainEventType::MessageDelivered | DomainEventType::MessageRead => {
            &["message.status_updated"]
        }
        DomainEventType::AgentAssigned => &["conversation.assigned"],
        DomainEventType::AdConversionTracked => &["conversion.tracked"],
        DomainEventType::PaymentFailed => &["billing.payment_failed"],
        DomainEventType::TrackingCreated
        | DomainEventType::ProjectCreated
        | DomainEventType::BillingAccountCreated
        | DomainEventType::SubscriptionRenewed => &[],
    }
}

/// Best-effort outbound webhook delivery.
///
/// Called once per mapped business event name, after the row has been
/// durably relayed. A failure here never changes the row's status.
#[async_trait]
pub trait WebhookNotifier: Send + Sync {
    async fn notify(
        &self,
        business_event: &str,
        payload: &serde_json::Value,
    ) -> Result<(), PublishError>;
}

/// Notifier that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl WebhookNotifier for LoggingNotifier {
    async fn notify(
        &self,
        business_event: &str,
        _payload: &serde_json::Value,
    ) -> Result<(), PublishError> {
        tracing::debug!(business_event, "Webhook notification");
        Ok(())
    }
}

/// A notification captured by [`InMemoryNotifier`].
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub business_event: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Default)]
struct InMemoryNotifierState {
    sent: Vec<Notification>,
    fail_on_notify: bool,
}

/// In-memory notifier for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    state: Arc<Mutex<InMemoryNotifierState>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, InMemoryNotifierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_fail_on_notify(&self, fail: bool) {
        self.state().fail_on_notify = fail;
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.state().sent.clone()
    }

    /// Business event names notified so far, in order.
    pub fn sent_names(&self) -> Vec<String> {
        self.state()
            .sent
            .iter()
            .map(|n| n.business_event.clone())
            .collect()
    }
}

#[async_trait]
impl WebhookNotifier for InMemoryNotifier {
    async fn notify(
        &self,
        business_event: &str,
        payload: &serde_json::Value,
    ) -> Result<(), PublishError> {
        let mut state = self.state();
        if state.fail_on_notify {
            return Err(PublishError::Webhook(format!(
                "endpoint rejected {business_event}"
            )));
        }
        state.sent.push(Notification {
            business_event: business_event.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }
}
