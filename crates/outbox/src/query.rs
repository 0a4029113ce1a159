use chrono::{DateTime, Utc};

use crate::{AggregateId, OutboxEvent, OutboxStatus};

/// Filter for scoped, read-only inspection of outbox rows
/// (per tenant/project dashboards, operator tooling).
///
/// Results are ordered by creation time, oldest first.
#[derive(Debug, Clone, Default)]
pub struct OutboxQuery {
    pub tenant_id: Option<String>,
    pub project_id: Option<String>,
    pub status: Option<OutboxStatus>,
    pub event_type: Option<String>,
    pub aggregate_id: Option<AggregateId>,
    /// Inclusive lower bound on `created_at`.
    pub from_created_at: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`.
    pub to_created_at: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl OutboxQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query scoped to a tenant.
    pub fn for_tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            ..Default::default()
        }
    }

    pub fn project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn status(mut self, status: OutboxStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn aggregate_id(mut self, id: AggregateId) -> Self {
        self.aggregate_id = Some(id);
        self
    }

    pub fn from_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.from_created_at = Some(at);
        self
    }

    pub fn to_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.to_created_at = Some(at);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// True if the row passes every filter (pagination not applied).
    pub fn matches(&self, event: &OutboxEvent) -> bool {
        if let Some(ref tenant) = self.tenant_id
            && event.tenant_id.as_ref() != Some(tenant)
        {
            return false;
        }
        if let Some(ref project) = self.project_id
            && event.project_id.as_ref() != Some(project)
        {
            return false;
        }
        if let Some(status) = self.status
            && event.status != status
        {
            return false;
        }
        if let Some(ref event_type) = self.event_type
            && &event.event_type != event_type
        {
            return false;
        }
        if let Some(id) = self.aggregate_id
            && event.aggregate_id != id
        {
            return false;
        }
        if let Some(from) = self.from_created_at
            && event.created_at < from
        {
            return false;
        }
        if let Some(to) = self.to_created_at
            && event.created_at > to
        {
            return false;
        }
        true
    }
}
