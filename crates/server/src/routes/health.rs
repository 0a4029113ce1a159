//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use outbox::OutboxStore;
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub pending_events: u64,
    pub failed_events: u64,
    pub workers: usize,
}

/// GET /health: outbox backlog as seen by the relay.
///
/// Answers 503 when the store cannot be queried.
pub async fn check<S: OutboxStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<HealthResponse>, ApiError> {
    let health = state.relay.health().await?;
    Ok(Json(HealthResponse {
        status: "ok",
        pending_events: health.pending,
        failed_events: health.failed,
        workers: state.relay.config().workers,
    }))
}
