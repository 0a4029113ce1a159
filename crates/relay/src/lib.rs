//! Outbox relay.
//!
//! A [`RelayProcessor`] polls the outbox store, claims `pending` rows with the
//! store's optimistic lock, publishes each row to the message transport keyed
//! by its event type and forwards the decoded payload to the webhook notifier.
//! Failed rows are retried under the store's backoff and max-retry rules.
//!
//! Delivery is at-least-once. Several processors may share one store; the
//! claim is the only guard against double delivery, so consumers must be
//! idempotent.

pub mod config;
pub mod error;
pub mod processor;
pub mod publisher;
pub mod webhook;

pub use config::RelayConfig;
pub use error::{PublishError, RelayError, Result};
pub use processor::{IterationReport, RelayHealth, RelayProcessor};
pub use publisher::{InMemoryPublisher, LoggingPublisher, MessagePublisher, PublishedMessage};
pub use webhook::{
    InMemoryNotifier, LoggingNotifier, Notification, WebhookNotifier, business_events,
};
