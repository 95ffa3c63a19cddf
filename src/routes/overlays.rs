use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::models::overlay::ScheduledOverlay;
use crate::models::requests::{
    EditOverlayRequest, ErrorResponse, RecordResultRequest, ScheduleOverlayRequest,
};
use crate::services::registry::RegistryError;

/// Registry failures rendered as JSON error bodies.
pub struct ApiError(RegistryError);

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RegistryError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::InvalidTransition { .. } => StatusCode::CONFLICT,
            RegistryError::Store(e) => {
                tracing::error!(error = %e, "Store error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = ErrorResponse {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// GET /api/v1/overlays — all scheduled overlays, newest first.
pub async fn list_overlays(
    State(state): State<AppState>,
) -> Result<Json<Vec<ScheduledOverlay>>, ApiError> {
    Ok(Json(state.registry.list().await?))
}

/// POST /api/v1/overlays — schedule an overlay with its recipient list.
pub async fn schedule_overlay(
    State(state): State<AppState>,
    Json(req): Json<ScheduleOverlayRequest>,
) -> Result<(StatusCode, Json<ScheduledOverlay>), ApiError> {
    req.validate()
        .map_err(|report| RegistryError::Validation(report.to_string()))?;

    let overlay = state
        .registry
        .schedule(req.overlay_config, req.scheduled_time, &req.recipients_csv)
        .await?;

    if let Err(e) = state.registry.prune(state.max_stored_overlays).await {
        tracing::warn!(error = %e, "Failed to prune old scheduled overlays");
    }

    Ok((StatusCode::CREATED, Json(overlay)))
}

/// GET /api/v1/overlays/{id}
pub async fn get_overlay(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ScheduledOverlay>, ApiError> {
    Ok(Json(state.registry.get(&id).await?))
}

/// PUT /api/v1/overlays/{id} — reschedule a pending overlay.
pub async fn edit_overlay(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<EditOverlayRequest>,
) -> Result<Json<ScheduledOverlay>, ApiError> {
    req.validate()
        .map_err(|report| RegistryError::Validation(report.to_string()))?;

    let overlay = state
        .registry
        .edit(&id, req.overlay_config, req.scheduled_time)
        .await?;
    Ok(Json(overlay))
}

/// DELETE /api/v1/overlays/{id} — cancel a pending overlay.
pub async fn cancel_overlay(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.registry.cancel(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/overlays/{id}/terminate — stop an overlay mid-send.
pub async fn terminate_overlay(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ScheduledOverlay>, ApiError> {
    Ok(Json(state.registry.terminate(&id).await?))
}

/// POST /api/v1/overlays/{id}/result — final outcome from an external sender.
pub async fn record_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(RecordResultRequest(result)): Json<RecordResultRequest>,
) -> Result<Json<ScheduledOverlay>, ApiError> {
    Ok(Json(state.registry.record_result(&id, result).await?))
}
