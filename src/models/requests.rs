use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::overlay::{OverlayConfig, OverlayResult};

/// Request to schedule an overlay for later delivery.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleOverlayRequest {
    #[garde(dive)]
    pub overlay_config: OverlayConfig,

    #[garde(skip)]
    pub scheduled_time: DateTime<Utc>,

    /// Recipient list as CSV with a `token` header column.
    #[garde(length(min = 1))]
    pub recipients_csv: String,
}

/// Request to reschedule or rewrite a pending overlay.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EditOverlayRequest {
    #[garde(dive)]
    pub overlay_config: OverlayConfig,

    #[garde(skip)]
    pub scheduled_time: DateTime<Utc>,
}

/// Final outcome reported by an external send pipeline.
#[derive(Debug, Deserialize)]
#[serde(transparent)]
pub struct RecordResultRequest(pub OverlayResult);

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
