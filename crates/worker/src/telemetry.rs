//! Log subscriber and Prometheus exporter setup.

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{Config, LogFormat};
use crate::error::WorkerError;

/// Installs the global tracing subscriber.
pub fn init_tracing(config: &Config) -> Result<(), WorkerError> {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
    }
    .map_err(|e| WorkerError::Logging(e.to_string()))
}

/// Installs the Prometheus recorder and its scrape listener on
/// `config.metrics_addr`. Must be called from within the runtime.
pub fn init_metrics(config: &Config) -> Result<(), WorkerError> {
    PrometheusBuilder::new()
        .with_http_listener(config.metrics_addr)
        .install()?;
    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    metrics::describe_counter!("orders_created_total", "Orders accepted by intake");
    metrics::describe_counter!("orders_rejected_total", "Orders rejected by intake, by reason");
    metrics::describe_counter!("reservation_attempts_total", "Reservation deliveries processed");
    metrics::describe_counter!("reservations_succeeded_total", "Attempts that reserved every item");
    metrics::describe_counter!("reservations_failed_total", "Attempts that failed to reserve");
    metrics::describe_counter!("reservation_retries_total", "Retry messages published");
    metrics::describe_counter!(
        "reservations_dead_lettered_total",
        "Messages moved to the dead-letter store"
    );
    metrics::describe_counter!(
        "reservation_duplicates_skipped_total",
        "Deliveries skipped because the attempt was already claimed"
    );
    metrics::describe_counter!("stock_rollbacks_total", "Attempts that released reserved items");
    metrics::describe_counter!(
        "stock_release_failures_total",
        "Items that could not be released during a rollback"
    );
    metrics::describe_counter!(
        "order_status_update_failures_total",
        "Orders that could not be marked failed"
    );
    metrics::describe_counter!("orders_swept_total", "Stale pending orders republished");
    metrics::describe_histogram!(
        "reservation_duration_seconds",
        metrics::Unit::Seconds,
        "Time spent on one reservation attempt"
    );
}
