use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use uuid::Uuid;

use crate::models::overlay::{OverlayConfig, OverlayResult, OverlayStatus, ScheduledOverlay};
use crate::services::recipients;
use crate::services::store::{OverlayStore, StoreError};

/// Error message stored on a job that an operator stopped mid-send.
pub const TERMINATED_BY_USER: &str = "Terminated by user";

/// Default cap on how many records the registry keeps.
pub const DEFAULT_MAX_STORED: usize = 50;

/// Source of "now" for schedule validation and timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Used by tests.
pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.0.lock().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Client-facing bookkeeping of deferred overlay jobs.
///
/// Every operation is a read-modify-write of the whole collection. Clones
/// share one write lock, so writers in the same process never interleave;
/// separate processes on one store still race last-writer-wins. The
/// registry owns no timers; callers decide how often to `list` or
/// `claim_due`.
#[derive(Clone)]
pub struct OverlayRegistry {
    store: Arc<dyn OverlayStore>,
    clock: Arc<dyn Clock>,
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl OverlayRegistry {
    pub fn new(store: Arc<dyn OverlayStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn OverlayStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn store(&self) -> &Arc<dyn OverlayStore> {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Change feed from the underlying store.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.store.subscribe()
    }

    /// All records, newest first. Always re-reads the store.
    pub async fn list(&self) -> Result<Vec<ScheduledOverlay>, RegistryError> {
        let mut overlays = self.store.load().await?;
        overlays.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(overlays)
    }

    pub async fn get(&self, id: &str) -> Result<ScheduledOverlay, RegistryError> {
        self.store
            .load()
            .await?
            .into_iter()
            .find(|o| o.id == id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Register a pending overlay without recipients attached.
    pub async fn create(
        &self,
        config: OverlayConfig,
        scheduled_time: DateTime<Utc>,
    ) -> Result<ScheduledOverlay, RegistryError> {
        let now = self.clock.now();
        validate_schedule(&config, scheduled_time, now)?;

        let overlay = ScheduledOverlay {
            id: Uuid::new_v4().to_string(),
            overlay_config: config,
            scheduled_time,
            created_at: now,
            completed_at: None,
            status: OverlayStatus::Pending,
            error: None,
            result: None,
            retry_count: 0,
        };

        {
            let _guard = self.write_lock.lock().await;
            let mut overlays = self.store.load().await?;
            overlays.push(overlay.clone());
            self.store.save(&overlays).await?;
        }

        metrics::counter!("overlays_scheduled_total").increment(1);
        tracing::info!(
            overlay_id = %overlay.id,
            scheduled_time = %overlay.scheduled_time,
            "Overlay scheduled"
        );

        Ok(overlay)
    }

    /// Register a pending overlay together with its recipient CSV.
    pub async fn schedule(
        &self,
        config: OverlayConfig,
        scheduled_time: DateTime<Utc>,
        recipients_csv: &str,
    ) -> Result<ScheduledOverlay, RegistryError> {
        validate_schedule(&config, scheduled_time, self.clock.now())?;
        let tokens = recipients::parse_tokens(recipients_csv)
            .map_err(|e| RegistryError::Validation(e.to_string()))?;

        let overlay = self.create(config, scheduled_time).await?;

        if let Err(e) = self.store.put_recipients(&overlay.id, recipients_csv).await {
            // Roll the record back so the worker never claims a job without recipients.
            let _guard = self.write_lock.lock().await;
            let mut overlays = self.store.load().await?;
            overlays.retain(|o| o.id != overlay.id);
            self.store.save(&overlays).await?;
            return Err(e.into());
        }

        tracing::debug!(overlay_id = %overlay.id, recipients = tokens.len(), "Recipients stored");
        Ok(overlay)
    }

    /// Remove a pending overlay and its recipients.
    pub async fn cancel(&self, id: &str) -> Result<ScheduledOverlay, RegistryError> {
        let guard = self.write_lock.lock().await;
        let mut overlays = self.store.load().await?;
        let index = position(&overlays, id)?;

        let status = overlays[index].status;
        if status != OverlayStatus::Pending {
            return Err(RegistryError::InvalidTransition {
                id: id.to_string(),
                from: status,
                action: "cancel",
            });
        }

        let removed = overlays.remove(index);
        self.store.save(&overlays).await?;
        drop(guard);

        if let Err(e) = self.store.delete_recipients(id).await {
            tracing::warn!(overlay_id = %id, error = %e, "Failed to delete recipients");
        }

        tracing::info!(overlay_id = %id, "Scheduled overlay cancelled");
        Ok(removed)
    }

    /// Replace the content and fire time of a pending overlay.
    pub async fn edit(
        &self,
        id: &str,
        config: OverlayConfig,
        scheduled_time: DateTime<Utc>,
    ) -> Result<ScheduledOverlay, RegistryError> {
        let now = self.clock.now();
        validate_schedule(&config, scheduled_time, now)?;

        let updated = self
            .update(id, "edit", |overlay| {
                if overlay.status != OverlayStatus::Pending {
                    return false;
                }
                overlay.overlay_config = config;
                overlay.scheduled_time = scheduled_time;
                true
            })
            .await?;

        tracing::info!(
            overlay_id = %id,
            scheduled_time = %scheduled_time,
            "Scheduled overlay edited"
        );
        Ok(updated)
    }

    /// Stop a job that is mid-send. Partial results are kept.
    pub async fn terminate(&self, id: &str) -> Result<ScheduledOverlay, RegistryError> {
        let now = self.clock.now();
        let updated = self
            .update(id, "terminate", |overlay| {
                if overlay.status != OverlayStatus::Processing {
                    return false;
                }
                overlay.status = OverlayStatus::Failed;
                overlay.completed_at = Some(now);
                overlay.error = Some(TERMINATED_BY_USER.to_string());
                true
            })
            .await?;

        metrics::counter!("overlays_failed_total").increment(1);
        tracing::warn!(overlay_id = %id, "Overlay processing terminated by user");
        Ok(updated)
    }

    /// Store an intermediate result while the job keeps running.
    pub async fn record_progress(
        &self,
        id: &str,
        result: OverlayResult,
    ) -> Result<ScheduledOverlay, RegistryError> {
        self.update(id, "record progress", |overlay| {
            if overlay.status != OverlayStatus::Processing {
                return false;
            }
            overlay.result = Some(result);
            true
        })
        .await
    }

    /// Store the final result and close the job: `completed` when nothing
    /// failed, `failed` otherwise.
    pub async fn record_result(
        &self,
        id: &str,
        result: OverlayResult,
    ) -> Result<ScheduledOverlay, RegistryError> {
        let now = self.clock.now();
        let updated = self
            .update(id, "record result", |overlay| {
                if overlay.status != OverlayStatus::Processing {
                    return false;
                }
                if result.failed == 0 {
                    overlay.status = OverlayStatus::Completed;
                    overlay.error = None;
                } else {
                    overlay.status = OverlayStatus::Failed;
                    overlay.error = Some(format!(
                        "{} of {} notifications failed",
                        result.failed,
                        result.success.saturating_add(result.failed)
                    ));
                }
                overlay.completed_at = Some(now);
                overlay.result = Some(result);
                true
            })
            .await?;

        match updated.status {
            OverlayStatus::Completed => metrics::counter!("overlays_completed_total").increment(1),
            _ => metrics::counter!("overlays_failed_total").increment(1),
        }
        tracing::info!(
            overlay_id = %id,
            status = %updated.status,
            "Overlay result recorded"
        );
        Ok(updated)
    }

    /// Move every pending overlay whose time has come to `processing` and
    /// hand them back to the caller.
    pub async fn claim_due(&self) -> Result<Vec<ScheduledOverlay>, RegistryError> {
        let now = self.clock.now();
        let _guard = self.write_lock.lock().await;
        let mut overlays = self.store.load().await?;

        let mut claimed = Vec::new();
        for overlay in overlays.iter_mut() {
            if overlay.status == OverlayStatus::Pending && overlay.scheduled_time <= now {
                overlay.status = OverlayStatus::Processing;
                claimed.push(overlay.clone());
            }
        }

        if !claimed.is_empty() {
            self.store.save(&overlays).await?;
            tracing::info!(count = claimed.len(), "Claimed due overlays");
        }

        let pending = overlays
            .iter()
            .filter(|o| o.status == OverlayStatus::Pending)
            .count();
        metrics::gauge!("overlays_pending").set(pending as f64);

        Ok(claimed)
    }

    /// Handle a whole-job failure (as opposed to per-recipient failures):
    /// back to `pending` while retries remain, `failed` once exhausted.
    pub async fn release_for_retry(
        &self,
        id: &str,
        reason: &str,
        max_retries: u32,
    ) -> Result<ScheduledOverlay, RegistryError> {
        let now = self.clock.now();
        let updated = self
            .update(id, "retry", |overlay| {
                if overlay.status != OverlayStatus::Processing {
                    return false;
                }
                if overlay.retry_count < max_retries {
                    overlay.retry_count += 1;
                    overlay.status = OverlayStatus::Pending;
                    overlay.result = None;
                    overlay.error = Some(format!(
                        "Retry attempt {}/{}: {}",
                        overlay.retry_count, max_retries, reason
                    ));
                } else {
                    overlay.status = OverlayStatus::Failed;
                    overlay.completed_at = Some(now);
                    overlay.error =
                        Some(format!("Failed after {} attempts: {}", max_retries, reason));
                }
                true
            })
            .await?;

        if updated.status == OverlayStatus::Failed {
            metrics::counter!("overlays_failed_total").increment(1);
            tracing::warn!(overlay_id = %id, reason, "Overlay failed after max retries");
        } else {
            tracing::info!(
                overlay_id = %id,
                retry_count = updated.retry_count,
                "Overlay returned to pending for retry"
            );
        }
        Ok(updated)
    }

    /// Keep only the newest `max_stored` records. Returns how many were dropped.
    pub async fn prune(&self, max_stored: usize) -> Result<usize, RegistryError> {
        let evicted = {
            let _guard = self.write_lock.lock().await;
            let mut overlays = self.store.load().await?;
            if overlays.len() <= max_stored {
                return Ok(0);
            }

            overlays.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            let evicted = overlays.split_off(max_stored);
            self.store.save(&overlays).await?;
            evicted
        };

        for overlay in &evicted {
            if let Err(e) = self.store.delete_recipients(&overlay.id).await {
                tracing::warn!(overlay_id = %overlay.id, error = %e, "Failed to delete recipients");
            }
        }

        tracing::info!(evicted = evicted.len(), "Pruned old scheduled overlays");
        Ok(evicted.len())
    }

    /// Apply `mutate` to one record and persist. `mutate` returns false when
    /// the record's status does not allow `action`; nothing is written then.
    async fn update<F>(
        &self,
        id: &str,
        action: &'static str,
        mutate: F,
    ) -> Result<ScheduledOverlay, RegistryError>
    where
        F: FnOnce(&mut ScheduledOverlay) -> bool,
    {
        let _guard = self.write_lock.lock().await;
        let mut overlays = self.store.load().await?;
        let index = position(&overlays, id)?;

        let from = overlays[index].status;
        if !mutate(&mut overlays[index]) {
            return Err(RegistryError::InvalidTransition {
                id: id.to_string(),
                from,
                action,
            });
        }

        let updated = overlays[index].clone();
        self.store.save(&overlays).await?;
        Ok(updated)
    }
}

fn position(overlays: &[ScheduledOverlay], id: &str) -> Result<usize, RegistryError> {
    overlays
        .iter()
        .position(|o| o.id == id)
        .ok_or_else(|| RegistryError::NotFound(id.to_string()))
}

fn validate_schedule(
    config: &OverlayConfig,
    scheduled_time: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), RegistryError> {
    config.check().map_err(RegistryError::Validation)?;
    if scheduled_time <= now {
        return Err(RegistryError::Validation(
            "Scheduled time must be in the future".to_string(),
        ));
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Scheduled overlay not found: {0}")]
    NotFound(String),

    #[error("Cannot {action} overlay {id} while it is {from}")]
    InvalidTransition {
        id: String,
        from: OverlayStatus,
        action: &'static str,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
