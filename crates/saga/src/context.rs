//! Explicit, caller-threaded saga context.
//!
//! A [`SagaContext`] is an immutable value. [`SagaContext::start_saga`] and
//! [`SagaContext::next_step`] return new contexts and never modify the one
//! they are called on, so concurrent sagas cannot observe each other's
//! metadata. Nothing is propagated implicitly: producers pass the context
//! they want stamped on an event.

use outbox::{OutboxEvent, OutboxEventBuilder, metadata};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::saga_type::SagaType;

/// Saga keys of an outbox row's metadata mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaMetadata {
    pub correlation_id: String,
    pub saga_type: Option<String>,
    pub step: Option<String>,
    pub step_number: Option<i64>,
    pub tenant_id: Option<String>,
}

impl SagaMetadata {
    /// Reads the saga keys of a stored row. `None` for rows raised outside
    /// any saga.
    pub fn from_event(event: &OutboxEvent) -> Option<Self> {
        let m = &event.metadata;
        Some(Self {
            correlation_id: metadata::get_str(m, metadata::CORRELATION_ID)?.to_string(),
            saga_type: metadata::get_str(m, metadata::SAGA_TYPE).map(str::to_string),
            step: metadata::get_str(m, metadata::SAGA_STEP).map(str::to_string),
            step_number: metadata::get_i64(m, metadata::STEP_NUMBER),
            tenant_id: metadata::get_str(m, metadata::TENANT_ID).map(str::to_string),
        })
    }

    /// Writes the saga keys into a row under construction.
    pub fn apply(&self, builder: OutboxEventBuilder) -> OutboxEventBuilder {
        let mut builder = builder.metadata(
            metadata::CORRELATION_ID,
            serde_json::Value::from(self.correlation_id.as_str()),
        );
        if let Some(ref saga_type) = self.saga_type {
            builder = builder.metadata(metadata::SAGA_TYPE, saga_type.as_str().into());
        }
        if let Some(ref step) = self.step {
            builder = builder.metadata(metadata::SAGA_STEP, step.as_str().into());
        }
        if let Some(step_number) = self.step_number {
            builder = builder.metadata(metadata::STEP_NUMBER, step_number.into());
        }
        if let Some(ref tenant_id) = self.tenant_id {
            builder = builder
                .metadata(metadata::TENANT_ID, tenant_id.as_str().into())
                .tenant_id(tenant_id.as_str());
        }
        builder
    }
}

/// The saga an operation runs in, if any.
///
/// The default context is the background context: no saga, nothing stamped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SagaContext {
    correlation_id: Option<String>,
    saga_type: Option<SagaType>,
    step: Option<String>,
    step_number: Option<i64>,
    tenant_id: Option<String>,
}

impl SagaContext {
    /// The background context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives a context for a new saga execution: fresh correlation id,
    /// step number 1, no step label yet.
    pub fn start_saga(&self, saga_type: SagaType, tenant_id: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(Uuid::new_v4().to_string()),
            saga_type: Some(saga_type),
            step: None,
            step_number: Some(1),
            tenant_id: Some(tenant_id.into()),
        }
    }

    /// Derives a context for the next step, incrementing the step number.
    pub fn next_step(&self, step: impl Into<String>) -> Self {
        Self {
            step: Some(step.into()),
            step_number: Some(self.step_number.unwrap_or(0) + 1),
            ..self.clone()
        }
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn saga_type(&self) -> Option<SagaType> {
        self.saga_type
    }

    pub fn step(&self) -> Option<&str> {
        self.step.as_deref()
    }

    pub fn step_number(&self) -> Option<i64> {
        self.step_number
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    /// True when a saga has been started in this context.
    pub fn in_saga(&self) -> bool {
        self.correlation_id.is_some()
    }

    /// The metadata stamped on events raised in this context.
    pub fn metadata(&self) -> Option<SagaMetadata> {
        Some(SagaMetadata {
            correlation_id: self.correlation_id.clone()?,
            saga_type: self.saga_type.map(String::from),
            step: self.step.clone(),
            step_number: self.step_number,
            tenant_id: self.tenant_id.clone(),
        })
    }

    /// Stamps the saga metadata onto a row under construction. Outside a
    /// saga the builder is returned untouched.
    pub fn stamp(&self, builder: OutboxEventBuilder) -> OutboxEventBuilder {
        match self.metadata() {
            Some(saga) => saga.apply(builder),
            None => builder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outbox::AggregateId;

    fn builder() -> OutboxEventBuilder {
        OutboxEvent::builder()
            .aggregate_id(AggregateId::new())
            .aggregate_type("contact")
            .event_type("contact.created")
            .payload_bytes(b"{}".to_vec())
    }

    #[test]
    fn background_context_has_nothing() {
        let ctx = SagaContext::new();
        assert!(!ctx.in_saga());
        assert_eq!(ctx.correlation_id(), None);
        assert_eq!(ctx.saga_type(), None);
        assert_eq!(ctx.step(), None);
        assert_eq!(ctx.step_number(), None);
        assert_eq!(ctx.tenant_id(), None);
    }

    #[test]
    fn start_saga_stamps_identity() {
        let ctx = SagaContext::new().start_saga(SagaType::CreateContactWithSession, "tenant-1");
        assert!(ctx.in_saga());
        assert_eq!(ctx.saga_type(), Some(SagaType::CreateContactWithSession));
        assert_eq!(ctx.tenant_id(), Some("tenant-1"));
        assert_eq!(ctx.step_number(), Some(1));
        assert_eq!(ctx.step(), None);
        assert!(Uuid::parse_str(ctx.correlation_id().unwrap()).is_ok());
    }

    #[test]
    fn each_saga_gets_a_fresh_correlation_id() {
        let root = SagaContext::new();
        let a = root.start_saga(SagaType::TrackAdConversion, "t");
        let b = root.start_saga(SagaType::TrackAdConversion, "t");
        assert_ne!(a.correlation_id(), b.correlation_id());
    }

    #[test]
    fn next_step_derives_without_mutating() {
        let start = SagaContext::new().start_saga(SagaType::ProcessInboundMessage, "t");
        let second = start.next_step("open_session");
        let third = second.next_step("store_message");

        assert_eq!(start.step_number(), Some(1));
        assert_eq!(second.step_number(), Some(2));
        assert_eq!(second.step(), Some("open_session"));
        assert_eq!(third.step_number(), Some(3));
        assert_eq!(third.correlation_id(), start.correlation_id());
    }

    #[test]
    fn stamp_outside_saga_leaves_metadata_empty() {
        let event = SagaContext::new().stamp(builder()).build().unwrap();
        assert!(event.metadata.is_empty());
        assert_eq!(SagaMetadata::from_event(&event), None);
    }

    #[test]
    fn stamp_then_read_back() {
        let ctx = SagaContext::new()
            .start_saga(SagaType::ChangePipelineStatus, "tenant-9")
            .next_step("update_pipeline_status");
        let event = ctx.stamp(builder()).build().unwrap();

        let read = SagaMetadata::from_event(&event).unwrap();
        assert_eq!(Some(read.clone()), ctx.metadata());
        assert_eq!(read.saga_type.as_deref(), Some("change_pipeline_status"));
        assert_eq!(read.step_number, Some(2));
        assert_eq!(event.tenant_id.as_deref(), Some("tenant-9"));
        assert_eq!(event.correlation_id(), ctx.correlation_id());
    }
}
