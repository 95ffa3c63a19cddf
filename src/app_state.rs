use std::sync::Arc;

use crate::services::registry::OverlayRegistry;
use crate::services::store::OverlayStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: OverlayRegistry,
    pub max_stored_overlays: usize,
}

impl AppState {
    pub fn new(store: Arc<dyn OverlayStore>, max_stored_overlays: usize) -> Self {
        Self {
            registry: OverlayRegistry::new(store),
            max_stored_overlays,
        }
    }

    pub fn with_registry(registry: OverlayRegistry, max_stored_overlays: usize) -> Self {
        Self {
            registry,
            max_stored_overlays,
        }
    }
}
