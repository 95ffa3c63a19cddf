use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::{watch, RwLock};

use crate::models::overlay::ScheduledOverlay;

/// Well-known key the registry collection lives under.
pub const STORAGE_KEY: &str = "scheduled_overlays";

/// Persistence seam for the scheduled overlay registry.
///
/// The whole collection is read and written as one serialized array, so
/// concurrent writers race with last-write-wins semantics.
#[async_trait]
pub trait OverlayStore: Send + Sync {
    /// Read the full collection. An absent collection is empty.
    async fn load(&self) -> Result<Vec<ScheduledOverlay>, StoreError>;

    /// Replace the full collection.
    async fn save(&self, overlays: &[ScheduledOverlay]) -> Result<(), StoreError>;

    /// Revision counter bumped after every `save` through this instance.
    fn subscribe(&self) -> watch::Receiver<u64>;

    /// Store the recipient CSV attached to an overlay.
    async fn put_recipients(&self, id: &str, csv: &str) -> Result<(), StoreError>;

    async fn get_recipients(&self, id: &str) -> Result<Option<String>, StoreError>;

    async fn delete_recipients(&self, id: &str) -> Result<(), StoreError>;

    /// Cheap reachability probe for health checks.
    async fn health_check(&self) -> Result<(), StoreError> {
        self.load().await.map(|_| ())
    }
}

/// In-process store. Used by tests and single-node deployments that accept
/// losing state on restart.
pub struct MemoryStore {
    collection: RwLock<Option<String>>,
    recipients: RwLock<HashMap<String, String>>,
    revision: watch::Sender<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            collection: RwLock::new(None),
            recipients: RwLock::new(HashMap::new()),
            revision,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OverlayStore for MemoryStore {
    async fn load(&self) -> Result<Vec<ScheduledOverlay>, StoreError> {
        match self.collection.read().await.as_deref() {
            Some(payload) => Ok(serde_json::from_str(payload)?),
            None => Ok(Vec::new()),
        }
    }

    async fn save(&self, overlays: &[ScheduledOverlay]) -> Result<(), StoreError> {
        // Stored serialized so memory and durable backends agree on what survives.
        let payload = serde_json::to_string(overlays)?;
        *self.collection.write().await = Some(payload);
        self.revision.send_modify(|r| *r += 1);
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    async fn put_recipients(&self, id: &str, csv: &str) -> Result<(), StoreError> {
        self.recipients
            .write()
            .await
            .insert(id.to_string(), csv.to_string());
        Ok(())
    }

    async fn get_recipients(&self, id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.recipients.read().await.get(id).cloned())
    }

    async fn delete_recipients(&self, id: &str) -> Result<(), StoreError> {
        self.recipients.write().await.remove(id);
        Ok(())
    }
}

/// Directory-backed store: `scheduled_overlays.json` plus one CSV per overlay
/// under `recipients/`.
pub struct FileStore {
    root: PathBuf,
    revision: watch::Sender<u64>,
}

impl FileStore {
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(root.join("recipients")).await?;
        let (revision, _) = watch::channel(0);
        Ok(Self { root, revision })
    }

    fn collection_path(&self) -> PathBuf {
        self.root.join(format!("{STORAGE_KEY}.json"))
    }

    fn recipients_path(&self, id: &str) -> Result<PathBuf, StoreError> {
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(StoreError::InvalidKey(id.to_string()));
        }
        Ok(self.root.join("recipients").join(format!("{id}.csv")))
    }
}

/// Write via a sibling temp file so readers never observe a torn file.
/// Each write gets its own temp name; overlapping writes to the same path
/// then resolve to whichever rename lands last.
async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4()));
    tokio::fs::write(&tmp, contents).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(StoreError::Io(e));
    }
    Ok(())
}

#[async_trait]
impl OverlayStore for FileStore {
    async fn load(&self) -> Result<Vec<ScheduledOverlay>, StoreError> {
        match tokio::fs::read(self.collection_path()).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn save(&self, overlays: &[ScheduledOverlay]) -> Result<(), StoreError> {
        let payload = serde_json::to_vec_pretty(overlays)?;
        write_atomic(&self.collection_path(), &payload).await?;
        self.revision.send_modify(|r| *r += 1);
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    async fn put_recipients(&self, id: &str, csv: &str) -> Result<(), StoreError> {
        let path = self.recipients_path(id)?;
        write_atomic(&path, csv.as_bytes()).await
    }

    async fn get_recipients(&self, id: &str) -> Result<Option<String>, StoreError> {
        let path = self.recipients_path(id)?;
        match tokio::fs::read_to_string(path).await {
            Ok(csv) => Ok(Some(csv)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn delete_recipients(&self, id: &str) -> Result<(), StoreError> {
        let path = self.recipients_path(id)?;
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid store key: {0:?}")]
    InvalidKey(String),
}
