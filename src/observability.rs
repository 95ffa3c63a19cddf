//! Logging and metrics setup shared by the API server and the worker.

use tracing_subscriber::EnvFilter;

/// Initialize structured JSON logging, `info` unless `RUST_LOG` says otherwise.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();
}

/// Register descriptions for every metric the crate emits.
pub fn describe_metrics() {
    metrics::describe_counter!(
        "overlays_scheduled_total",
        "Total overlays scheduled for later delivery"
    );
    metrics::describe_counter!(
        "overlays_completed_total",
        "Total scheduled overlays delivered without failures"
    );
    metrics::describe_counter!(
        "overlays_failed_total",
        "Total scheduled overlays that failed or were terminated"
    );
    metrics::describe_counter!(
        "notifications_sent_total",
        "Total overlay notifications accepted by FCM"
    );
    metrics::describe_counter!(
        "notifications_failed_total",
        "Total overlay notifications rejected by FCM"
    );
    metrics::describe_gauge!(
        "overlays_pending",
        "Scheduled overlays waiting for their fire time"
    );
}
