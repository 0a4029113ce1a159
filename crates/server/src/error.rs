//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use relay::RelayError;
use saga::SagaError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Saga layer error.
    Saga(SagaError),
    /// Outbox store unreachable or failing.
    Unavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Saga(err) => saga_error_to_response(err),
            ApiError::Unavailable(msg) => {
                tracing::error!(error = %msg, "outbox store unavailable");
                (StatusCode::SERVICE_UNAVAILABLE, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, String) {
    match &err {
        SagaError::SagaNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        SagaError::UnknownSagaType(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        SagaError::NoCompensationHandler(_) => (StatusCode::UNPROCESSABLE_ENTITY, err.to_string()),
        SagaError::Outbox(_) => {
            tracing::error!(error = %err, "outbox store error");
            (StatusCode::SERVICE_UNAVAILABLE, err.to_string())
        }
        _ => {
            tracing::error!(error = %err, "saga error");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        ApiError::Unavailable(err.to_string())
    }
}
