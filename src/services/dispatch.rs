use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::models::overlay::OverlayConfig;

/// Case id the driver app expects on overlay notifications.
const ENTITY_ID: &str = "f071d5a7-fe7f-4b98-b95f-933df86bc193";

/// Delivers one overlay to one device.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, token: &str, config: &OverlayConfig) -> Result<(), DispatchError>;
}

/// Client for the FCM HTTP v1 `messages:send` endpoint.
pub struct FcmClient {
    http: Client,
    endpoint: String,
    auth_token: String,
}

#[derive(Serialize)]
struct FcmRequest<'a> {
    message: FcmMessage<'a>,
}

#[derive(Serialize)]
struct FcmMessage<'a> {
    token: &'a str,
    android: FcmAndroid,
}

#[derive(Serialize)]
struct FcmAndroid {
    data: FcmData,
}

#[derive(Serialize)]
struct FcmData {
    notification_type: &'static str,
    show_notification: &'static str,
    entity_type: &'static str,
    entity_ids: &'static str,
    notification_json: String,
    driver_notification_payload: String,
}

#[derive(Deserialize)]
struct FcmErrorBody {
    error: FcmErrorDetail,
}

#[derive(Deserialize)]
struct FcmErrorDetail {
    message: String,
}

impl FcmClient {
    pub fn new(endpoint: String, auth_token: String) -> Self {
        Self {
            http: Client::new(),
            endpoint,
            auth_token,
        }
    }
}

/// Build the Android data payload the driver app renders as an overlay.
fn build_data(config: &OverlayConfig) -> Result<FcmData, DispatchError> {
    let notification_json = serde_json::json!({
        "title": config.title,
        "body": config.description,
        "icon": config.image_url,
        "tag": "MESSAGE",
        "sound": "default",
        "channel_id": "General",
    });

    let mut payload = serde_json::to_value(config).map_err(DispatchError::Serialize)?;
    if let Some(obj) = payload.as_object_mut() {
        obj.insert(
            "method".to_string(),
            serde_json::to_value(config.method.unwrap_or_default())
                .map_err(DispatchError::Serialize)?,
        );
        obj.entry("reqBody")
            .or_insert_with(|| serde_json::Value::Object(Default::default()));
    }

    Ok(FcmData {
        notification_type: "DRIVER_NOTIFY",
        show_notification: "true",
        entity_type: "Case",
        entity_ids: ENTITY_ID,
        notification_json: notification_json.to_string(),
        driver_notification_payload: payload.to_string(),
    })
}

#[async_trait]
impl NotificationSender for FcmClient {
    async fn send(&self, token: &str, config: &OverlayConfig) -> Result<(), DispatchError> {
        let request = FcmRequest {
            message: FcmMessage {
                token,
                android: FcmAndroid {
                    data: build_data(config)?,
                },
            },
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.auth_token)
            .json(&request)
            .send()
            .await
            .map_err(DispatchError::Http)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<FcmErrorBody>(&body)
            .map(|b| b.error.message)
            .unwrap_or_else(|_| format!("HTTP {}", status));
        Err(DispatchError::Rejected(message))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Rejected(String),

    #[error("Failed to serialize notification payload: {0}")]
    Serialize(#[from] serde_json::Error),
}
