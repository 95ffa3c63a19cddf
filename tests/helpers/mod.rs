//! Shared builders for integration tests

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;

use overlay_scheduler::models::overlay::{OverlayAction, OverlayConfig};
use overlay_scheduler::services::registry::{ManualClock, OverlayRegistry};
use overlay_scheduler::services::store::MemoryStore;

/// Fixed starting instant so scheduled times are deterministic.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 10, 0, 0).unwrap()
}

pub fn overlay_config(title: &str) -> OverlayConfig {
    OverlayConfig {
        title: title.to_string(),
        description: "Complete 5 rides today to earn a bonus".to_string(),
        image_url: "https://cdn.example.com/bonus.png".to_string(),
        ok_button_text: "View offer".to_string(),
        cancel_button_text: "Dismiss".to_string(),
        actions: vec![OverlayAction::OpenLink],
        link: Some("https://example.com/bonus".to_string()),
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

/// Registry over a fresh in-memory store with a manual clock at `epoch()`.
pub fn memory_registry() -> (OverlayRegistry, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(epoch()));
    let registry = OverlayRegistry::with_clock(Arc::new(MemoryStore::new()), clock.clone());
    (registry, clock)
}
