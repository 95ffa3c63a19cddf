use axum::extract::DefaultBodyLimit;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use overlay_scheduler::app_state::AppState;
use overlay_scheduler::config::AppConfig;
use overlay_scheduler::{observability, routes};

#[tokio::main]
async fn main() {
    observability::init_tracing();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing overlay-scheduler API");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    observability::describe_metrics();

    tracing::info!(backend = ?config.store_backend, "Opening overlay store");
    let store = config
        .open_store()
        .await
        .expect("Failed to open overlay store");

    let state = AppState::new(store, config.max_stored_overlays);

    let app = routes::api_router(state)
        .merge(routes::metrics::metrics_router(prometheus_handle))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        // Recipient CSVs arrive inline
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(50 * 1024 * 1024));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received");
        })
        .await
        .expect("Server error");
}
