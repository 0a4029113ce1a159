//! Process host for the outbox relay and saga diagnostics.
//!
//! Runs a pool of relay workers against the configured outbox store and
//! serves health, Prometheus metrics and read-only saga views over HTTP,
//! with structured logging (tracing).

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use outbox::OutboxStore;
use relay::{MessagePublisher, RelayConfig, RelayProcessor, WebhookNotifier};
use saga::{
    CompensationConfig, CompensationExecutor, ExecutorCompensationHandler,
    OutboxCompensationDispatcher, SagaCoordinator, SagaType,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState<S> {
    pub relay: RelayProcessor<S>,
    pub coordinator: SagaCoordinator<S>,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: OutboxStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route("/saga-types", get(routes::sagas::types::<S>))
        .route("/sagas/{correlation_id}", get(routes::sagas::get::<S>))
        .route(
            "/sagas/{correlation_id}/timeline",
            get(routes::sagas::timeline::<S>),
        )
        .route(
            "/sagas/{correlation_id}/compensate",
            post(routes::sagas::compensate::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wires the relay and the saga coordinator over one store.
///
/// Fast-path saga types get the stock reverse-order compensation handler,
/// which writes compensation rows back through the same outbox. Slow-path
/// sagas are left to their workflow engine.
pub fn create_state<S: OutboxStore + Clone + 'static>(
    store: S,
    relay_config: RelayConfig,
    publisher: Arc<dyn MessagePublisher>,
    notifier: Arc<dyn WebhookNotifier>,
) -> Arc<AppState<S>> {
    let relay = RelayProcessor::new(store.clone(), publisher, notifier, relay_config);

    let executor = CompensationExecutor::new(Arc::new(OutboxCompensationDispatcher::new(
        store.clone(),
    )));
    let handler = Arc::new(ExecutorCompensationHandler::new(
        executor,
        CompensationConfig::reverse_order(),
    ));

    let mut coordinator = SagaCoordinator::new(store);
    for saga_type in SagaType::ALL.into_iter().filter(SagaType::is_fast_path) {
        coordinator.register_compensation_handler(saga_type, handler.clone());
    }

    Arc::new(AppState { relay, coordinator })
}
