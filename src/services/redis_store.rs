use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::watch;

use crate::models::overlay::ScheduledOverlay;
use crate::services::store::{OverlayStore, StoreError, STORAGE_KEY};

const KEY_PREFIX: &str = "overlay_scheduler";

/// Redis-backed registry store, shared by the API server and workers.
///
/// The revision feed only reflects writes made through this instance; other
/// processes are observed by re-reading.
pub struct RedisStore {
    client: redis::Client,
    revision: watch::Sender<u64>,
}

impl RedisStore {
    pub fn new(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url).map_err(StoreError::Redis)?;
        let (revision, _) = watch::channel(0);
        Ok(Self { client, revision })
    }

    fn collection_key() -> String {
        format!("{KEY_PREFIX}:{STORAGE_KEY}")
    }

    fn recipients_key(id: &str) -> String {
        format!("{KEY_PREFIX}:recipients:{id}")
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(StoreError::Redis)
    }
}

#[async_trait]
impl OverlayStore for RedisStore {
    async fn load(&self) -> Result<Vec<ScheduledOverlay>, StoreError> {
        let mut conn = self.connection().await?;
        let payload: Option<String> = conn.get(Self::collection_key()).await?;
        match payload {
            Some(payload) => Ok(serde_json::from_str(&payload)?),
            None => Ok(Vec::new()),
        }
    }

    async fn save(&self, overlays: &[ScheduledOverlay]) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(overlays)?;
        conn.set::<_, _, ()>(Self::collection_key(), &payload).await?;
        self.revision.send_modify(|r| *r += 1);
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    async fn put_recipients(&self, id: &str, csv: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        conn.set::<_, _, ()>(Self::recipients_key(id), csv).await?;
        Ok(())
    }

    async fn get_recipients(&self, id: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        let csv: Option<String> = conn.get(Self::recipients_key(id)).await?;
        Ok(csv)
    }

    async fn delete_recipients(&self, id: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(Self::recipients_key(id)).await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}
