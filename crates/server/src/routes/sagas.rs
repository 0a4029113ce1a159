//! Saga diagnostics and compensation trigger endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use outbox::OutboxStore;
use saga::{SagaExecution, SagaType, TimelineEntry};
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

// -- Response types --

#[derive(Serialize)]
pub struct SagaResponse {
    #[serde(flatten)]
    pub execution: SagaExecution,
    pub is_fast_path: Option<bool>,
    pub deviations: Vec<String>,
}

#[derive(Serialize)]
pub struct CompensationResponse {
    pub correlation_id: String,
    pub saga_type: Option<String>,
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct SagaTypeResponse {
    pub name: &'static str,
    pub fast_path: bool,
    pub expected_steps: &'static [&'static str],
    pub compensation_handler: bool,
}

// -- Handlers --

/// GET /sagas/{correlation_id}: execution snapshot rebuilt from outbox rows.
pub async fn get<S: OutboxStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(correlation_id): Path<String>,
) -> Result<Json<SagaResponse>, ApiError> {
    let execution = state.coordinator.track_saga(&correlation_id).await?;
    let is_fast_path = execution.known_saga_type().map(|t| t.is_fast_path());
    let deviations = execution.deviations();

    Ok(Json(SagaResponse {
        execution,
        is_fast_path,
        deviations,
    }))
}

/// GET /sagas/{correlation_id}/timeline
pub async fn timeline<S: OutboxStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(correlation_id): Path<String>,
) -> Result<Json<Vec<TimelineEntry>>, ApiError> {
    let entries = state
        .coordinator
        .get_execution_timeline(&correlation_id)
        .await?;
    Ok(Json(entries))
}

/// POST /sagas/{correlation_id}/compensate: runs the registered handler for
/// the saga's type.
///
/// The compensation rows are written to the outbox and delivered by the
/// relay like any other event.
pub async fn compensate<S: OutboxStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(correlation_id): Path<String>,
) -> Result<Json<CompensationResponse>, ApiError> {
    state.coordinator.compensate_saga(&correlation_id).await?;
    let execution = state.coordinator.track_saga(&correlation_id).await?;

    Ok(Json(CompensationResponse {
        correlation_id,
        saga_type: execution.saga_type,
        status: "compensated",
    }))
}

/// GET /saga-types: the saga catalogue.
pub async fn types<S: OutboxStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<Vec<SagaTypeResponse>> {
    let types = SagaType::ALL
        .iter()
        .map(|saga_type| SagaTypeResponse {
            name: saga_type.as_str(),
            fast_path: saga_type.is_fast_path(),
            expected_steps: saga_type.expected_steps(),
            compensation_handler: state.coordinator.has_compensation_handler(*saga_type),
        })
        .collect();
    Json(types)
}
