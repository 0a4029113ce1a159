//! Catalogue of saga types.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SagaError;

/// A named kind of saga.
///
/// Fast-path sagas are short choreographies expected to finish well under a
/// second and can run inline on request paths. Slow-path sagas are
/// long-running and belong on a durable workflow scheduler; the core only
/// classifies them so callers can route accordingly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum SagaType {
    ProcessInboundMessage,
    ChangePipelineStatus,
    CreateContactWithSession,
    TrackAdConversion,
    OnboardCustomer,
    RenewSubscription,
}

impl SagaType {
    pub const ALL: [SagaType; 6] = [
        SagaType::ProcessInboundMessage,
        SagaType::ChangePipelineStatus,
        SagaType::CreateContactWithSession,
        SagaType::TrackAdConversion,
        SagaType::OnboardCustomer,
        SagaType::RenewSubscription,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaType::ProcessInboundMessage => "process_inbound_message",
            SagaType::ChangePipelineStatus => "change_pipeline_status",
            SagaType::CreateContactWithSession => "create_contact_with_session",
            SagaType::TrackAdConversion => "track_ad_conversion",
            SagaType::OnboardCustomer => "onboard_customer",
            SagaType::RenewSubscription => "renew_subscription",
        }
    }

    pub fn is_fast_path(&self) -> bool {
        !self.is_slow_path()
    }

    pub fn is_slow_path(&self) -> bool {
        matches!(self, SagaType::OnboardCustomer | SagaType::RenewSubscription)
    }

    /// Canonical step labels, in order.
    ///
    /// For diagnostics only: events whose steps deviate from this list are
    /// never rejected.
    pub fn expected_steps(&self) -> &'static [&'static str] {
        match self {
            SagaType::ProcessInboundMessage => &[
                "resolve_contact",
                "open_session",
                "store_message",
                "assign_agent",
            ],
            SagaType::ChangePipelineStatus => &[
                "validate_transition",
                "update_pipeline_status",
                "notify_pipeline_change",
            ],
            SagaType::CreateContactWithSession => &["create_contact", "start_session"],
            SagaType::TrackAdConversion => {
                &["resolve_contact", "create_tracking", "track_conversion"]
            }
            SagaType::OnboardCustomer => &[
                "create_billing_account",
                "create_project",
                "create_contact",
                "send_welcome",
            ],
            SagaType::RenewSubscription => {
                &["charge_payment", "renew_subscription", "notify_customer"]
            }
        }
    }
}

impl std::fmt::Display for SagaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SagaType {
    type Err = SagaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SagaType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| SagaError::UnknownSagaType(s.to_string()))
    }
}

impl From<SagaType> for String {
    fn from(saga_type: SagaType) -> Self {
        saga_type.as_str().to_string()
    }
}

impl TryFrom<String> for SagaType {
    type Error = SagaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
