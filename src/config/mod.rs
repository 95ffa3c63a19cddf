use serde::Deserialize;
use std::sync::Arc;

use crate::services::processor::ProcessorSettings;
use crate::services::redis_store::RedisStore;
use crate::services::registry::DEFAULT_MAX_STORED;
use crate::services::store::{FileStore, MemoryStore, OverlayStore, StoreError};

/// Which persistence primitive backs the registry.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    File,
    Redis,
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default)]
    pub store_backend: StoreBackend,

    /// Directory for the file backend
    #[serde(default = "default_store_path")]
    pub store_path: String,

    /// Redis connection string for the redis backend
    pub redis_url: Option<String>,

    /// FCM HTTP v1 send endpoint
    #[serde(default = "default_fcm_endpoint")]
    pub fcm_endpoint: String,

    /// OAuth bearer token for FCM. Only the worker needs it.
    #[serde(default)]
    pub fcm_auth_token: String,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_max_parallel_batches")]
    pub max_parallel_batches: usize,

    #[serde(default = "default_send_concurrency")]
    pub send_concurrency: usize,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_max_stored_overlays")]
    pub max_stored_overlays: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_store_path() -> String {
    "./data".to_string()
}

fn default_fcm_endpoint() -> String {
    "https://fcm.googleapis.com/v1/projects/namma-yatri/messages:send".to_string()
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_batch_size() -> usize {
    5000
}

fn default_max_parallel_batches() -> usize {
    4
}

fn default_send_concurrency() -> usize {
    50
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_stored_overlays() -> usize {
    DEFAULT_MAX_STORED
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn processor_settings(&self) -> ProcessorSettings {
        ProcessorSettings {
            batch_size: self.batch_size,
            max_parallel_batches: self.max_parallel_batches,
            send_concurrency: self.send_concurrency,
            max_retries: self.max_retries,
        }
    }

    /// Open the configured store backend.
    pub async fn open_store(&self) -> Result<Arc<dyn OverlayStore>, ConfigError> {
        let store: Arc<dyn OverlayStore> = match self.store_backend {
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
            StoreBackend::File => Arc::new(FileStore::open(&self.store_path).await?),
            StoreBackend::Redis => {
                let url = self
                    .redis_url
                    .as_deref()
                    .ok_or(ConfigError::Missing("REDIS_URL"))?;
                Arc::new(RedisStore::new(url)?)
            }
        };
        Ok(store)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set for the selected store backend")]
    Missing(&'static str),

    #[error("Failed to open store: {0}")]
    Store(#[from] StoreError),
}
