//! Reservation worker entry point.

use tokio::signal;
use tokio::sync::watch;
use worker::Config;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), worker::WorkerError> {
    // 1. Load configuration
    let config = Config::from_env()?;

    // 2. Initialize tracing and the Prometheus exporter
    worker::telemetry::init_tracing(&config)?;
    worker::telemetry::init_metrics(&config)?;
    tracing::info!(metrics_addr = %config.metrics_addr, "metrics exporter listening");

    // 3. Connect and migrate
    let pool = worker::connect(&config).await?;

    // 4. Run until a signal arrives
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    worker::run(&config, pool.clone(), shutdown_rx).await;

    pool.close().await;
    tracing::info!("worker shut down gracefully");
    Ok(())
}
