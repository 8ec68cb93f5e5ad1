//! Reservation worker process.
//!
//! Wires the PostgreSQL order store, inventory store, and reservation queue
//! into a [`WorkerPool`] and a [`PendingOrderSweep`], and runs both until
//! shutdown is signalled.

pub mod config;
pub mod error;
pub mod telemetry;

use std::sync::Arc;

use channel::PostgresChannel;
use domain::PostgresOrderStore;
use inventory::{LockingInventoryStore, PostgresInventoryStore};
use reservation::{PendingOrderSweep, ReservationWorker, WorkerPool};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;

pub use config::{Config, ConfigError, LogFormat};
pub use error::WorkerError;

/// Connects to the database and applies pending migrations.
pub async fn connect(config: &Config) -> Result<PgPool, WorkerError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("database migrations applied");

    Ok(pool)
}

/// Runs the consumer pool and the pending-order sweep over `pool` until
/// `shutdown` flips to true. Returns once every in-flight delivery is
/// settled.
pub async fn run(config: &Config, pool: PgPool, shutdown: watch::Receiver<bool>) {
    let orders = PostgresOrderStore::new(pool.clone());
    let inventory = LockingInventoryStore::new(PostgresInventoryStore::new(pool.clone()));
    let channel = PostgresChannel::with_options(pool, config.channel_options());

    let worker = ReservationWorker::new(
        orders.clone(),
        inventory,
        channel.clone(),
        config.retry_policy(),
    );
    let workers = WorkerPool::new(Arc::new(worker), config.worker_concurrency);
    let sweep = PendingOrderSweep::new(orders, channel, config.sweep_stale_after);

    tracing::info!(
        concurrency = workers.concurrency(),
        max_retries = config.max_retries,
        sweep_interval = ?config.sweep_interval,
        "reservation worker started"
    );

    tokio::join!(
        workers.run(shutdown.clone()),
        sweep.run(config.sweep_interval, shutdown),
    );
}
