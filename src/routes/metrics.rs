use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// GET /metrics — registry and delivery counters in Prometheus text format.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
}

/// `/metrics` carries its own state, separate from the registry routes.
pub fn metrics_router(handle: Arc<PrometheusHandle>) -> Router {
    Router::new()
        .route("/metrics", get(prometheus_metrics))
        .with_state(handle)
}
