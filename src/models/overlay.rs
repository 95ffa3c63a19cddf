use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// What the driver app does when the overlay's OK button is pressed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OverlayAction {
    OpenLink,
    OpenApp,
    SetDriverOnline,
}

/// HTTP method the driver app uses when the overlay triggers a request.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestMethod {
    Get,
    #[default]
    Post,
}

/// Display content of an in-app overlay pushed to driver devices.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OverlayConfig {
    #[garde(length(min = 1, max = 500))]
    pub title: String,

    #[garde(length(min = 1, max = 500))]
    pub description: String,

    #[garde(length(max = 2048))]
    pub image_url: String,

    #[garde(length(max = 100))]
    pub ok_button_text: String,

    #[garde(length(max = 100))]
    pub cancel_button_text: String,

    #[garde(skip)]
    #[serde(default)]
    pub actions: Vec<OverlayAction>,

    #[garde(length(min = 1, max = 2048))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,

    #[garde(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<RequestMethod>,

    #[garde(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub req_body: Option<serde_json::Map<String, serde_json::Value>>,

    #[garde(skip)]
    pub title_visibility: bool,
    #[garde(skip)]
    pub description_visibility: bool,
    #[garde(skip)]
    pub button_ok_visibility: bool,
    #[garde(skip)]
    pub button_cancel_visibility: bool,
    #[garde(skip)]
    pub button_layout_visibility: bool,
    #[garde(skip)]
    pub image_visibility: bool,
}

impl OverlayConfig {
    /// Field-level validation plus the cross-field rule that `OPEN_LINK`
    /// needs somewhere to go.
    pub fn check(&self) -> Result<(), String> {
        self.validate().map_err(|report| report.to_string())?;

        if self.actions.contains(&OverlayAction::OpenLink)
            && self.link.as_deref().map_or(true, |l| l.trim().is_empty())
        {
            return Err("link: required when actions include OPEN_LINK".to_string());
        }

        Ok(())
    }
}

/// Lifecycle of a scheduled overlay.
///
/// `pending -> processing -> completed | failed`. A pending job can also be
/// cancelled (removed) and a processing job terminated (forced to failed).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OverlayStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl OverlayStatus {
    pub fn is_terminal(self) -> bool {
        match self {
            OverlayStatus::Pending | OverlayStatus::Processing => false,
            OverlayStatus::Completed | OverlayStatus::Failed => true,
        }
    }
}

/// A recipient token the send pipeline could not deliver to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailedToken {
    pub token: String,
    pub error: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub current_batch: u32,
    pub total_batches: u32,
    pub processed_lines: u64,
    pub total_lines: u64,
}

/// Accumulated outcome of a send job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OverlayResult {
    pub success: u64,
    pub failed: u64,
    #[serde(default)]
    pub failed_tokens: Vec<FailedToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<BatchProgress>,
}

/// A deferred overlay-send job as persisted in the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledOverlay {
    pub id: String,
    pub overlay_config: OverlayConfig,
    pub scheduled_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: OverlayStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<OverlayResult>,
    #[serde(default)]
    pub retry_count: u32,
}

#[cfg(test)]
pub(crate) fn sample_config() -> OverlayConfig {
    OverlayConfig {
        title: "Go online now".to_string(),
        description: "Demand is high in your area".to_string(),
        image_url: "https://cdn.example.com/banner.png".to_string(),
        ok_button_text: "Go online".to_string(),
        cancel_button_text: "Later".to_string(),
        actions: vec![OverlayAction::SetDriverOnline],
        link: None,
        method: None,
        req_body: None,
        title_visibility: true,
        description_visibility: true,
        button_ok_visibility: true,
        button_cancel_visibility: true,
        button_layout_visibility: true,
        image_visibility: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config_passes() {
        assert!(sample_config().check().is_ok());
    }

    #[test]
    fn test_empty_title_rejected() {
        let mut config = sample_config();
        config.title = String::new();
        let err = config.check().unwrap_err();
        assert!(err.contains("title"));
    }

    #[test]
    fn test_open_link_requires_link() {
        let mut config = sample_config();
        config.actions = vec![OverlayAction::OpenLink];
        assert!(config.check().is_err());

        config.link = Some("https://example.com/offer".to_string());
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_dashboard_json_shape() {
        let json = serde_json::json!({
            "title": "Hello",
            "description": "World",
            "imageUrl": "",
            "okButtonText": "OK",
            "cancelButtonText": "Cancel",
            "actions": ["OPEN_LINK", "SET_DRIVER_ONLINE"],
            "link": "https://example.com",
            "method": "GET",
            "titleVisibility": true,
            "descriptionVisibility": true,
            "buttonOkVisibility": true,
            "buttonCancelVisibility": false,
            "buttonLayoutVisibility": true,
            "imageVisibility": false
        });
        let config: OverlayConfig = serde_json::from_value(json).unwrap();
        assert_eq!(
            config.actions,
            vec![OverlayAction::OpenLink, OverlayAction::SetDriverOnline]
        );
        assert_eq!(config.method, Some(RequestMethod::Get));
        assert!(!config.image_visibility);
    }

    #[test]
    fn test_status_terminal() {
        assert!(!OverlayStatus::Pending.is_terminal());
        assert!(!OverlayStatus::Processing.is_terminal());
        assert!(OverlayStatus::Completed.is_terminal());
        assert!(OverlayStatus::Failed.is_terminal());
        assert_eq!(
            serde_json::to_string(&OverlayStatus::Processing).unwrap(),
            "\"processing\""
        );
    }
}
