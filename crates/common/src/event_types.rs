//! Closed catalogue of the domain event types that flow through the outbox,
//! and the static table mapping each one to its compensating event.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Returned when an event type string is not part of the catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown event type: {0}")]
pub struct UnknownEventType(pub String);

/// Domain events emitted by CRM aggregates.
///
/// The wire form (`as_str`) is what producers write into the outbox
/// `event_type` column and what the relay uses as the transport topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum DomainEventType {
    ContactCreated,
    ContactUpdated,
    ContactDeleted,
    ContactEnriched,
    ContactPipelineStatusChanged,
    SessionStarted,
    SessionEnded,
    MessageCreated,
    MessageDelivered,
    MessageRead,
    AgentAssigned,
    TrackingCreated,
    AdConversionTracked,
    ProjectCreated,
    BillingAccountCreated,
    SubscriptionRenewed,
    PaymentFailed,
}

impl DomainEventType {
    /// Every catalogued event type.
    pub const ALL: [DomainEventType; 17] = [
        DomainEventType::ContactCreated,
        DomainEventType::ContactUpdated,
        DomainEventType::ContactDeleted,
        DomainEventType::ContactEnriched,
        DomainEventType::ContactPipelineStatusChanged,
        DomainEventType::SessionStarted,
        DomainEventType::SessionEnded,
        DomainEventType::MessageCreated,
        DomainEventType::MessageDelivered,
        DomainEventType::MessageRead,
        DomainEventType::AgentAssigned,
        DomainEventType::TrackingCreated,
        DomainEventType::AdConversionTracked,
        DomainEventType::ProjectCreated,
        DomainEventType::BillingAccountCreated,
        DomainEventType::SubscriptionRenewed,
        DomainEventType::PaymentFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DomainEventType::ContactCreated => "contact.created",
            DomainEventType::ContactUpdated => "contact.updated",
            DomainEventType::ContactDeleted => "contact.deleted",
            DomainEventType::ContactEnriched => "contact.enriched",
            DomainEventType::ContactPipelineStatusChanged => "contact.pipeline_status_changed",
            DomainEventType::SessionStarted => "session.started",
            DomainEventType::SessionEnded => "session.ended",
            DomainEventType::MessageCreated => "message.created",
            DomainEventType::MessageDelivered => "message.delivered",
            DomainEventType::MessageRead => "message.read",
            DomainEventType::AgentAssigned => "agent.assigned",
            DomainEventType::TrackingCreated => "tracking.created",
            DomainEventType::AdConversionTracked => "ad_conversion.tracked",
            DomainEventType::ProjectCreated => "project.created",
            DomainEventType::BillingAccountCreated => "billing.account_created",
            DomainEventType::SubscriptionRenewed => "billing.subscription_renewed",
            DomainEventType::PaymentFailed => "billing.payment_failed",
        }
    }

    /// The compensating event for this domain event, if one exists.
    ///
    /// Events without an entry have nothing to undo (reads, deliveries,
    /// deletions, notifications of failure).
    pub fn compensation(&self) -> Option<CompensationEventType> {
        match self {
            DomainEventType::ContactCreated => Some(CompensationEventType::DeleteContact),
            DomainEventType::ContactPipelineStatusChanged => {
                Some(CompensationEventType::RevertPipelineStatus)
            }
            DomainEventType::SessionStarted => Some(CompensationEventType::CloseSession),
            DomainEventType::MessageCreated => Some(CompensationEventType::DeleteMessage),
            DomainEventType::AgentAssigned => Some(CompensationEventType::UnassignAgent),
            DomainEventType::TrackingCreated => Some(CompensationEventType::DeleteTracking),
            DomainEventType::AdConversionTracked => {
                Some(CompensationEventType::RevertAdConversion)
            }
            DomainEventType::ProjectCreated => Some(CompensationEventType::DeleteProject),
            DomainEventType::BillingAccountCreated => {
                Some(CompensationEventType::DeactivateBillingAccount)
            }
            DomainEventType::SubscriptionRenewed => {
                Some(CompensationEventType::RevertSubscriptionRenewal)
            }
            DomainEventType::ContactUpdated
            | DomainEventType::ContactDeleted
            | DomainEventType::ContactEnriched
            | DomainEventType::SessionEnded
            | DomainEventType::MessageDelivered
            | DomainEventType::MessageRead
            | DomainEventType::PaymentFailed => None,
        }
    }
}

impl std::fmt::Display for DomainEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DomainEventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DomainEventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

impl From<DomainEventType> for String {
    fn from(t: DomainEventType) -> Self {
        t.as_str().to_string()
    }
}

impl TryFrom<String> for DomainEventType {
    type Error = UnknownEventType;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Events that semantically undo a previously applied domain event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum CompensationEventType {
    DeleteContact,
    RevertPipelineStatus,
    CloseSession,
    DeleteMessage,
    UnassignAgent,
    DeleteTracking,
    RevertAdConversion,
    DeleteProject,
    DeactivateBillingAccount,
    RevertSubscriptionRenewal,
}

impl CompensationEventType {
    pub const ALL: [CompensationEventType; 10] = [
        CompensationEventType::DeleteContact,
        CompensationEventType::RevertPipelineStatus,
        CompensationEventType::CloseSession,
        CompensationEventType::DeleteMessage,
        CompensationEventType::UnassignAgent,
        CompensationEventType::DeleteTracking,
        CompensationEventType::RevertAdConversion,
        CompensationEventType::DeleteProject,
        CompensationEventType::DeactivateBillingAccount,
        CompensationEventType::RevertSubscriptionRenewal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CompensationEventType::DeleteContact => "contact.compensation.delete",
            CompensationEventType::RevertPipelineStatus => {
                "contact.compensation.revert_pipeline_status"
            }
            CompensationEventType::CloseSession => "session.compensation.close",
            CompensationEventType::DeleteMessage => "message.compensation.delete",
            CompensationEventType::UnassignAgent => "agent.compensation.unassign",
            CompensationEventType::DeleteTracking => "tracking.compensation.delete",
            CompensationEventType::RevertAdConversion => "ad_conversion.compensation.revert",
            CompensationEventType::DeleteProject => "project.compensation.delete",
            CompensationEventType::DeactivateBillingAccount => {
                "billing.compensation.deactivate_account"
            }
            CompensationEventType::RevertSubscriptionRenewal => {
                "billing.compensation.revert_subscription_renewal"
            }
        }
    }
}

impl std::fmt::Display for CompensationEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompensationEventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CompensationEventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

impl From<CompensationEventType> for String {
    fn from(t: CompensationEventType) -> Self {
        t.as_str().to_string()
    }
}

impl TryFrom<String> for CompensationEventType {
    type Error = UnknownEventType;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}
