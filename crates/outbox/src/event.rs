use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metadata::{self, Metadata};
use crate::{AggregateId, OutboxError, Result};

/// Stable identity of an outbox event, referenced by consumers and by saga
/// metadata. Distinct from the store-assigned row id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Relay status of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    /// Written by a producer, waiting to be relayed.
    #[default]
    Pending,
    /// Claimed by a relay worker. Soft lock; reclaimable once stale.
    Processing,
    /// Published to the transport.
    Processed,
    /// Last publish attempt failed; eligible for retry under the backoff rules.
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Processing => "processing",
            OutboxStatus::Processed => "processed",
            OutboxStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = OutboxError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(OutboxStatus::Pending),
            "processing" => Ok(OutboxStatus::Processing),
            "processed" => Ok(OutboxStatus::Processed),
            "failed" => Ok(OutboxStatus::Failed),
            other => Err(OutboxError::InvalidStatus(other.to_string())),
        }
    }
}

/// A durable, relayable unit of work.
///
/// The payload and identity fields never change after creation; only the
/// status, retry and timestamp fields are mutated, and only by the store's
/// relay-side operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    /// Row id assigned by the store on insert. Zero before the row is saved.
    pub id: i64,
    pub event_id: EventId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    pub event_type: String,
    /// Schema version of the payload.
    pub event_version: i32,
    /// Serialized event body. Opaque to the core.
    pub payload: Vec<u8>,
    pub metadata: Metadata,
    pub tenant_id: Option<String>,
    pub project_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub status: OutboxStatus,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub last_retry_at: Option<DateTime<Utc>>,
    /// When the row last entered `processing`. Drives stale-claim recovery.
    pub claimed_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    pub fn builder() -> OutboxEventBuilder {
        OutboxEventBuilder::default()
    }

    /// Decodes the payload as JSON.
    pub fn payload_json(&self) -> std::result::Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    pub fn correlation_id(&self) -> Option<&str> {
        metadata::get_str(&self.metadata, metadata::CORRELATION_ID)
    }

    pub fn saga_type(&self) -> Option<&str> {
        metadata::get_str(&self.metadata, metadata::SAGA_TYPE)
    }

    pub fn saga_step(&self) -> Option<&str> {
        metadata::get_str(&self.metadata, metadata::SAGA_STEP)
    }

    pub fn step_number(&self) -> Option<i64> {
        metadata::get_i64(&self.metadata, metadata::STEP_NUMBER)
    }

    /// The latest relay timestamp: processed time, or the last failed attempt.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        match self.status {
            OutboxStatus::Processed => self.processed_at,
            OutboxStatus::Failed => self.last_retry_at,
            OutboxStatus::Pending | OutboxStatus::Processing => None,
        }
    }
}

/// Builder for new outbox rows.
#[derive(Debug, Default)]
pub struct OutboxEventBuilder {
    event_id: Option<EventId>,
    aggregate_id: Option<AggregateId>,
    aggregate_type: Option<String>,
    event_type: Option<String>,
    event_version: Option<i32>,
    payload: Option<Vec<u8>>,
    metadata: Metadata,
    tenant_id: Option<String>,
    project_id: Option<String>,
    created_at: Option<DateTime<Utc>>,
}

impl OutboxEventBuilder {
    /// Sets the event ID. If not set, a new ID will be generated.
    pub fn event_id(mut self, id: EventId) -> Self {
        self.event_id = Some(id);
        self
    }

    pub fn aggregate_id(mut self, id: AggregateId) -> Self {
        self.aggregate_id = Some(id);
        self
    }

    pub fn aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type = Some(aggregate_type.into());
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Sets the payload schema version. Defaults to 1.
    pub fn event_version(mut self, version: i32) -> Self {
        self.event_version = Some(version);
        self
    }

    /// Serializes the payload as JSON.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> std::result::Result<Self, serde_json::Error> {
        self.payload = Some(serde_json::to_vec(payload)?);
        Ok(self)
    }

    /// Sets already-serialized payload bytes.
    pub fn payload_bytes(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Sets the creation time. If not set, the current time will be used.
    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Builds a new `pending` row.
    ///
    /// Fails with [`OutboxError::Validation`] when a required field
    /// (aggregate id, aggregate type, event type, payload) is missing.
    pub fn build(self) -> Result<OutboxEvent> {
        fn missing(field: &str) -> OutboxError {
            OutboxError::Validation(format!("{field} is required"))
        }

        Ok(OutboxEvent {
            id: 0,
            event_id: self.event_id.unwrap_or_default(),
            aggregate_id: self.aggregate_id.ok_or_else(|| missing("aggregate_id"))?,
            aggregate_type: self.aggregate_type.ok_or_else(|| missing("aggregate_type"))?,
            event_type: self.event_type.ok_or_else(|| missing("event_type"))?,
            event_version: self.event_version.unwrap_or(1),
            payload: self.payload.ok_or_else(|| missing("payload"))?,
            metadata: self.metadata,
            tenant_id: self.tenant_id,
            project_id: self.project_id,
            created_at: self.created_at.unwrap_or_else(Utc::now),
            processed_at: None,
            status: OutboxStatus::Pending,
            retry_count: 0,
            last_error: None,
            last_retry_at: None,
            claimed_at: None,
        })
    }
}

/// Checks that an event is a well-formed new row before it is inserted.
pub(crate) fn validate_new_event(event: &OutboxEvent) -> Result<()> {
    if event.event_type.trim().is_empty() {
        return Err(OutboxError::Validation("event_type must not be empty".into()));
    }
    if event.aggregate_type.trim().is_empty() {
        return Err(OutboxError::Validation(
            "aggregate_type must not be empty".into(),
        ));
    }
    if event.event_version < 1 {
        return Err(OutboxError::Validation(format!(
            "event_version must be >= 1, got {}",
            event.event_version
        )));
    }
    if event.status != OutboxStatus::Pending || event.retry_count != 0 {
        return Err(OutboxError::Validation(format!(
            "new rows must be pending with no retries, got {} / {}",
            event.status, event.retry_count
        )));
    }
    Ok(())
}
