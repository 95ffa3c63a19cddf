pub mod health;
pub mod metrics;
pub mod overlays;

use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;

/// Registry API routes, without the Prometheus endpoint.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route(
            "/api/v1/overlays",
            get(overlays::list_overlays).post(overlays::schedule_overlay),
        )
        .route(
            "/api/v1/overlays/{id}",
            get(overlays::get_overlay)
                .put(overlays::edit_overlay)
                .delete(overlays::cancel_overlay),
        )
        .route(
            "/api/v1/overlays/{id}/terminate",
            post(overlays::terminate_overlay),
        )
        .route("/api/v1/overlays/{id}/result", post(overlays::record_result))
        .with_state(state)
}
