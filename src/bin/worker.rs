use overlay_scheduler::{
    config::{AppConfig, StoreBackend},
    observability,
    services::{
        dispatch::FcmClient,
        processor::{OverlayProcessor, ProcessOutcome},
        registry::OverlayRegistry,
    },
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

#[tokio::main]
async fn main() {
    observability::init_tracing();

    tracing::info!("Starting overlay dispatch worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    if config.store_backend == StoreBackend::Memory {
        tracing::warn!("Memory store is private to this process, the API server cannot see it");
    }
    if config.fcm_auth_token.is_empty() {
        tracing::warn!("FCM_AUTH_TOKEN is empty, every send will be rejected");
    }

    tracing::info!(backend = ?config.store_backend, "Opening overlay store");
    let store = config
        .open_store()
        .await
        .expect("Failed to open overlay store");

    let registry = OverlayRegistry::new(store);
    let sender = Arc::new(FcmClient::new(
        config.fcm_endpoint.clone(),
        config.fcm_auth_token.clone(),
    ));
    let processor = OverlayProcessor::new(registry.clone(), sender, config.processor_settings());

    let mut ticker = interval(Duration::from_secs(config.poll_interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(
        poll_interval_secs = config.poll_interval_secs,
        "Worker ready, polling for due overlays"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received, in-flight overlays stay processing");
                break;
            }
        }

        let claimed = match registry.claim_due().await {
            Ok(claimed) => claimed,
            Err(e) => {
                tracing::error!(error = %e, "Failed to claim due overlays, will retry");
                continue;
            }
        };

        // Long sends run in the background so the next tick can still claim.
        for overlay in claimed {
            let processor = processor.clone();
            tokio::spawn(async move {
                match processor.process(&overlay).await {
                    Ok(ProcessOutcome::Finished(done)) => {
                        tracing::debug!(overlay_id = %done.id, status = %done.status, "Overlay done");
                    }
                    Ok(ProcessOutcome::Released(released)) => {
                        tracing::debug!(overlay_id = %released.id, status = %released.status, "Overlay released");
                    }
                    Ok(ProcessOutcome::Terminated { id }) => {
                        tracing::debug!(overlay_id = %id, "Overlay terminated");
                    }
                    Err(e) => {
                        tracing::error!(overlay_id = %overlay.id, error = %e, "Error processing overlay");
                    }
                }
            });
        }

        if let Err(e) = registry.prune(config.max_stored_overlays).await {
            tracing::warn!(error = %e, "Failed to prune old scheduled overlays");
        }
    }
}
