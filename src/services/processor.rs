use futures::future::join_all;
use std::sync::Arc;

use crate::models::overlay::{
    BatchProgress, FailedToken, OverlayConfig, OverlayResult, OverlayStatus, ScheduledOverlay,
};
use crate::services::dispatch::NotificationSender;
use crate::services::recipients;
use crate::services::registry::{OverlayRegistry, RegistryError};

/// Knobs for the send pipeline.
#[derive(Debug, Clone, Copy)]
pub struct ProcessorSettings {
    /// Recipients per batch.
    pub batch_size: usize,
    /// Batches sent concurrently before progress is recorded.
    pub max_parallel_batches: usize,
    /// Concurrent requests within one batch.
    pub send_concurrency: usize,
    /// Whole-job retries before a job is marked failed.
    pub max_retries: u32,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            batch_size: 5000,
            max_parallel_batches: 4,
            send_concurrency: 50,
            max_retries: 3,
        }
    }
}

/// How a processing run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// All batches were sent and the result recorded.
    Finished(ScheduledOverlay),
    /// An operator terminated the job while it was being sent.
    Terminated { id: String },
    /// The job could not run at all and went back to pending or to failed.
    Released(ScheduledOverlay),
}

/// Runs the send pipeline for claimed overlays and records the outcome back
/// into the registry.
#[derive(Clone)]
pub struct OverlayProcessor {
    registry: OverlayRegistry,
    sender: Arc<dyn NotificationSender>,
    settings: ProcessorSettings,
}

#[derive(Default)]
struct Tally {
    success: u64,
    failed: u64,
    failed_tokens: Vec<FailedToken>,
}

impl Tally {
    fn absorb(&mut self, other: Tally) {
        self.success += other.success;
        self.failed += other.failed;
        self.failed_tokens.extend(other.failed_tokens);
    }

    fn to_result(&self, progress: BatchProgress) -> OverlayResult {
        OverlayResult {
            success: self.success,
            failed: self.failed,
            failed_tokens: self.failed_tokens.clone(),
            progress: Some(progress),
        }
    }
}

impl OverlayProcessor {
    pub fn new(
        registry: OverlayRegistry,
        sender: Arc<dyn NotificationSender>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            registry,
            sender,
            settings,
        }
    }

    pub fn registry(&self) -> &OverlayRegistry {
        &self.registry
    }

    /// Claim everything that is due and process it to the end.
    pub async fn run_due(&self) -> Result<Vec<ProcessOutcome>, ProcessError> {
        let claimed = self.registry.claim_due().await?;
        let outcomes = join_all(claimed.iter().map(|overlay| self.process(overlay))).await;
        outcomes.into_iter().collect()
    }

    /// Send one claimed overlay to all of its recipients.
    pub async fn process(&self, overlay: &ScheduledOverlay) -> Result<ProcessOutcome, ProcessError> {
        let id = overlay.id.as_str();
        tracing::info!(overlay_id = %id, "Processing scheduled overlay");

        let current = self.registry.get(id).await?;
        if current.status != OverlayStatus::Processing {
            tracing::info!(overlay_id = %id, status = %current.status, "Overlay no longer processing, skipping");
            return Ok(ProcessOutcome::Terminated { id: id.to_string() });
        }

        let csv = match self.registry.store().get_recipients(id).await {
            Ok(Some(csv)) => csv,
            Ok(None) => {
                return self
                    .release(id, "Recipient list not found for scheduled overlay")
                    .await
            }
            Err(e) => return self.release(id, &e.to_string()).await,
        };

        let tokens = match recipients::parse_tokens(&csv) {
            Ok(tokens) => tokens,
            Err(e) => return self.release(id, &e.to_string()).await,
        };

        let batch_size = self.settings.batch_size.max(1);
        let parallel = self.settings.max_parallel_batches.max(1);
        let batches: Vec<&[String]> = tokens.chunks(batch_size).collect();
        let total_lines = tokens.len() as u64;
        let total_batches = batches.len().div_ceil(parallel) as u32;

        let mut tally = Tally::default();
        for (index, group) in batches.chunks(parallel).enumerate() {
            let results = join_all(
                group
                    .iter()
                    .map(|batch| self.send_batch(batch, &current.overlay_config)),
            )
            .await;
            for result in results {
                tally.absorb(result);
            }

            let progress = BatchProgress {
                current_batch: index as u32 + 1,
                total_batches,
                processed_lines: (((index + 1) * parallel * batch_size) as u64).min(total_lines),
                total_lines,
            };

            tracing::debug!(
                overlay_id = %id,
                current_batch = progress.current_batch,
                total_batches,
                success = tally.success,
                failed = tally.failed,
                "Batch group sent"
            );

            match self.registry.record_progress(id, tally.to_result(progress)).await {
                Ok(_) => {}
                Err(RegistryError::InvalidTransition { .. }) => {
                    return self.stopped(id).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let final_progress = BatchProgress {
            current_batch: total_batches,
            total_batches,
            processed_lines: total_lines,
            total_lines,
        };
        let finished = match self
            .registry
            .record_result(id, tally.to_result(final_progress))
            .await
        {
            Ok(finished) => finished,
            Err(RegistryError::InvalidTransition { .. }) => return self.stopped(id).await,
            Err(e) => return Err(e.into()),
        };

        self.cleanup(id).await;
        tracing::info!(
            overlay_id = %id,
            success = tally.success,
            failed = tally.failed,
            "Scheduled overlay finished"
        );
        Ok(ProcessOutcome::Finished(finished))
    }

    async fn send_batch(&self, batch: &[String], config: &OverlayConfig) -> Tally {
        let mut tally = Tally::default();
        for chunk in batch.chunks(self.settings.send_concurrency.max(1)) {
            let results = join_all(chunk.iter().map(|token| self.sender.send(token, config))).await;
            for (token, result) in chunk.iter().zip(results) {
                match result {
                    Ok(()) => tally.success += 1,
                    Err(e) => {
                        tally.failed += 1;
                        tally.failed_tokens.push(FailedToken {
                            token: token.clone(),
                            error: e.to_string(),
                        });
                    }
                }
            }
        }
        metrics::counter!("notifications_sent_total").increment(tally.success);
        metrics::counter!("notifications_failed_total").increment(tally.failed);
        tally
    }

    async fn release(&self, id: &str, reason: &str) -> Result<ProcessOutcome, ProcessError> {
        tracing::error!(overlay_id = %id, reason, "Scheduled overlay could not be processed");
        let released = match self
            .registry
            .release_for_retry(id, reason, self.settings.max_retries)
            .await
        {
            Ok(released) => released,
            Err(RegistryError::InvalidTransition { .. }) => return self.stopped(id).await,
            Err(e) => return Err(e.into()),
        };
        if released.status.is_terminal() {
            self.cleanup(id).await;
        }
        Ok(ProcessOutcome::Released(released))
    }

    async fn stopped(&self, id: &str) -> Result<ProcessOutcome, ProcessError> {
        tracing::info!(overlay_id = %id, "Overlay was terminated, stopping processing");
        self.cleanup(id).await;
        Ok(ProcessOutcome::Terminated { id: id.to_string() })
    }

    async fn cleanup(&self, id: &str) {
        if let Err(e) = self.registry.store().delete_recipients(id).await {
            tracing::warn!(overlay_id = %id, error = %e, "Failed to delete recipients");
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::overlay::sample_config;
    use crate::services::dispatch::DispatchError;
    use crate::services::registry::{Clock, ManualClock, TERMINATED_BY_USER};
    use crate::services::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Mutex;

    /// Fails tokens starting with "bad" and remembers what it sent.
    #[derive(Default)]
    struct FakeSender {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NotificationSender for FakeSender {
        async fn send(&self, token: &str, _config: &OverlayConfig) -> Result<(), DispatchError> {
            self.sent.lock().unwrap().push(token.to_string());
            if token.starts_with("bad") {
                Err(DispatchError::Rejected("Requested entity was not found.".to_string()))
            } else {
                Ok(())
            }
        }
    }

    /// Delivers everything and terminates the target overlay on the
    /// `terminate_at`-th send, as an operator would mid-run.
    struct TerminatingSender {
        registry: OverlayRegistry,
        target: Mutex<Option<String>>,
        terminate_at: usize,
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NotificationSender for TerminatingSender {
        async fn send(&self, token: &str, _config: &OverlayConfig) -> Result<(), DispatchError> {
            let count = {
                let mut sent = self.sent.lock().unwrap();
                sent.push(token.to_string());
                sent.len()
            };
            if count == self.terminate_at {
                let target = self.target.lock().unwrap().clone();
                if let Some(id) = target {
                    self.registry.terminate(&id).await.unwrap();
                }
            }
            Ok(())
        }
    }

    fn setup(settings: ProcessorSettings) -> (OverlayProcessor, Arc<ManualClock>, Arc<FakeSender>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 1, 10, 8, 0, 0).unwrap(),
        ));
        let registry = OverlayRegistry::with_clock(Arc::new(MemoryStore::new()), clock.clone());
        let sender = Arc::new(FakeSender::default());
        (
            OverlayProcessor::new(registry, sender.clone(), settings),
            clock,
            sender,
        )
    }

    fn small_batches() -> ProcessorSettings {
        ProcessorSettings {
            batch_size: 2,
            max_parallel_batches: 2,
            send_concurrency: 1,
            max_retries: 1,
        }
    }

    #[tokio::test]
    async fn test_all_delivered_completes() {
        let (processor, clock, sender) = setup(small_batches());
        let overlay = processor
            .registry()
            .schedule(sample_config(), clock.now() + Duration::minutes(1), "token\na\nb\nc\nd\ne\n")
            .await
            .unwrap();

        assert!(processor.run_due().await.unwrap().is_empty());
        clock.advance(Duration::minutes(1));
        let outcomes = processor.run_due().await.unwrap();
        assert_eq!(outcomes.len(), 1);

        let ProcessOutcome::Finished(done) = &outcomes[0] else {
            panic!("expected finished, got {:?}", outcomes[0]);
        };
        assert_eq!(done.status, OverlayStatus::Completed);
        let result = done.result.clone().unwrap();
        assert_eq!(result.success, 5);
        assert_eq!(result.failed, 0);
        assert_eq!(
            result.progress,
            Some(BatchProgress {
                current_batch: 2,
                total_batches: 2,
                processed_lines: 5,
                total_lines: 5,
            })
        );
        assert_eq!(sender.sent.lock().unwrap().len(), 5);
        assert_eq!(
            processor.registry().store().get_recipients(&overlay.id).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_partial_failures_mark_failed() {
        let (processor, clock, _) = setup(ProcessorSettings::default());
        processor
            .registry()
            .schedule(
                sample_config(),
                clock.now() + Duration::seconds(30),
                "token\nok-1\nbad-1\nok-2\nbad-2\n",
            )
            .await
            .unwrap();
        clock.advance(Duration::minutes(1));

        let outcomes = processor.run_due().await.unwrap();
        let ProcessOutcome::Finished(done) = &outcomes[0] else {
            panic!("expected finished");
        };
        assert_eq!(done.status, OverlayStatus::Failed);
        let result = done.result.clone().unwrap();
        assert_eq!(result.success, 2);
        assert_eq!(result.failed, 2);
        let failed: Vec<_> = result.failed_tokens.iter().map(|f| f.token.as_str()).collect();
        assert_eq!(failed, vec!["bad-1", "bad-2"]);
    }

    #[tokio::test]
    async fn test_missing_recipients_retries_then_fails() {
        let (processor, clock, _) = setup(small_batches());
        let overlay = processor
            .registry()
            .create(sample_config(), clock.now() + Duration::minutes(1))
            .await
            .unwrap();
        clock.advance(Duration::minutes(1));

        let outcomes = processor.run_due().await.unwrap();
        let ProcessOutcome::Released(released) = &outcomes[0] else {
            panic!("expected released");
        };
        assert_eq!(released.status, OverlayStatus::Pending);
        assert_eq!(released.retry_count, 1);

        let outcomes = processor.run_due().await.unwrap();
        let ProcessOutcome::Released(released) = &outcomes[0] else {
            panic!("expected released");
        };
        assert_eq!(released.id, overlay.id);
        assert_eq!(released.status, OverlayStatus::Failed);
    }

    #[tokio::test]
    async fn test_terminated_before_processing_is_skipped() {
        let (processor, clock, sender) = setup(small_batches());
        processor
            .registry()
            .schedule(sample_config(), clock.now() + Duration::minutes(1), "token\na\nb\n")
            .await
            .unwrap();
        clock.advance(Duration::minutes(1));

        let claimed = processor.registry().claim_due().await.unwrap();
        processor.registry().terminate(&claimed[0].id).await.unwrap();

        let outcome = processor.process(&claimed[0]).await.unwrap();
        assert_eq!(
            outcome,
            ProcessOutcome::Terminated {
                id: claimed[0].id.clone()
            }
        );
        assert!(sender.sent.lock().unwrap().is_empty());
        let stored = processor.registry().get(&claimed[0].id).await.unwrap();
        assert_eq!(stored.error.as_deref(), Some(TERMINATED_BY_USER));
    }

    #[tokio::test]
    async fn test_terminated_between_groups_stops_sending() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 1, 10, 8, 0, 0).unwrap(),
        ));
        let registry = OverlayRegistry::with_clock(Arc::new(MemoryStore::new()), clock.clone());
        // Groups of four tokens; the first send of the second group terminates.
        let sender = Arc::new(TerminatingSender {
            registry: registry.clone(),
            target: Mutex::new(None),
            terminate_at: 5,
            sent: Mutex::new(Vec::new()),
        });
        let processor = OverlayProcessor::new(registry.clone(), sender.clone(), small_batches());

        let overlay = registry
            .schedule(
                sample_config(),
                clock.now() + Duration::minutes(1),
                "token\na\nb\nc\nd\ne\nf\ng\nh\ni\nj\nk\nl\n",
            )
            .await
            .unwrap();
        *sender.target.lock().unwrap() = Some(overlay.id.clone());
        clock.advance(Duration::minutes(1));

        let outcomes = processor.run_due().await.unwrap();
        assert_eq!(
            outcomes,
            vec![ProcessOutcome::Terminated {
                id: overlay.id.clone()
            }]
        );

        let sent = sender.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 8);
        assert!(!sent.iter().any(|t| ["i", "j", "k", "l"].contains(&t.as_str())));

        let stored = registry.get(&overlay.id).await.unwrap();
        assert_eq!(stored.status, OverlayStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some(TERMINATED_BY_USER));
        let result = stored.result.unwrap();
        assert_eq!(result.success, 4);
        assert_eq!(result.failed, 0);
        assert_eq!(result.progress.map(|p| p.current_batch), Some(1));
        assert_eq!(
            registry.store().get_recipients(&overlay.id).await.unwrap(),
            None
        );
    }
}
