//! Well-known keys of the outbox metadata mapping.
//!
//! The saga layer writes these keys from the active saga context; the store
//! only relies on [`CORRELATION_ID`] to find a saga's rows.

use std::collections::HashMap;

/// Correlation id shared by every row of one saga execution.
pub const CORRELATION_ID: &str = "correlation_id";
/// Saga type wire name.
pub const SAGA_TYPE: &str = "saga_type";
/// Human-readable step label.
pub const SAGA_STEP: &str = "saga_step";
/// Step number, starting at 1.
pub const STEP_NUMBER: &str = "step_number";
/// Tenant that owns the saga.
pub const TENANT_ID: &str = "tenant_id";

/// Correlation id of the saga a compensation row undoes.
pub const COMPENSATES_CORRELATION_ID: &str = "compensates_correlation_id";
/// Event id of the row a compensation row undoes.
pub const COMPENSATES_EVENT_ID: &str = "compensates_event_id";

/// Metadata mapping carried by every outbox row.
pub type Metadata = HashMap<String, serde_json::Value>;

/// Reads a string entry.
pub fn get_str<'a>(metadata: &'a Metadata, key: &str) -> Option<&'a str> {
    metadata.get(key).and_then(|v| v.as_str())
}

/// Reads an integer entry.
pub fn get_i64(metadata: &Metadata, key: &str) -> Option<i64> {
    metadata.get(key).and_then(|v| v.as_i64())
}
