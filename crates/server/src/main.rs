//! Relay server entry point.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use outbox::{InMemoryOutboxStore, OutboxStore, PostgresOutboxStore};
use relay::{LoggingNotifier, LoggingPublisher};
use server::config::{Config, LogFormat};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Runs the relay workers and the HTTP server until a shutdown signal.
async fn serve<S: OutboxStore + Clone + 'static>(
    config: Config,
    store: S,
    metrics_handle: PrometheusHandle,
) {
    let state = server::create_state(
        store,
        config.relay.clone(),
        Arc::new(LoggingPublisher),
        Arc::new(LoggingNotifier),
    );

    let shutdown = CancellationToken::new();
    let mut workers = state
        .relay
        .spawn_workers(config.relay.workers, shutdown.clone());
    tracing::info!(workers = config.relay.workers, "relay workers started");

    let app = server::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting relay server");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");

    let token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            token.cancel();
        })
        .await
        .expect("server error");

    // Workers finish their current iteration before observing the token.
    shutdown.cancel();
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "relay worker terminated abnormally");
        }
    }

    tracing::info!("server shut down gracefully");
}

#[tokio::main]
async fn main() {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Pick the outbox backend and serve
    match config.database_url.clone() {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(&url)
                .await
                .expect("failed to connect to PostgreSQL");
            let store = PostgresOutboxStore::new(pool);
            store
                .run_migrations()
                .await
                .expect("failed to run outbox migrations");
            tracing::info!("using PostgreSQL outbox store");
            serve(config, store, metrics_handle).await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory outbox store");
            serve(config, InMemoryOutboxStore::new(), metrics_handle).await;
        }
    }
}
