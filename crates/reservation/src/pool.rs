use std::sync::Arc;

use channel::ReservationChannel;
use domain::OrderStore;
use inventory::InventoryStore;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::worker::ReservationWorker;

/// Runs several consumer loops over one shared worker.
pub struct WorkerPool<O, I, C> {
    worker: Arc<ReservationWorker<O, I, C>>,
    concurrency: usize,
}

impl<O, I, C> WorkerPool<O, I, C>
where
    O: OrderStore + 'static,
    I: InventoryStore + 'static,
    C: ReservationChannel + 'static,
{
    /// Creates a pool of `concurrency` consumers (at least one).
    pub fn new(worker: Arc<ReservationWorker<O, I, C>>, concurrency: usize) -> Self {
        Self {
            worker,
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Runs every consumer until shutdown is signalled or the channel ends,
    /// then waits for all of them to finish their current delivery.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let mut consumers = JoinSet::new();

        for consumer in 0..self.concurrency {
            let worker = Arc::clone(&self.worker);
            let shutdown = shutdown.clone();
            consumers.spawn(async move {
                tracing::debug!(consumer, "reservation consumer started");
                if let Err(e) = worker.run(shutdown).await {
                    tracing::error!(consumer, error = %e, "reservation consumer stopped");
                }
            });
        }
        tracing::info!(concurrency = self.concurrency, "worker pool started");

        while let Some(result) = consumers.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "reservation consumer panicked");
            }
        }
        tracing::info!("worker pool stopped");
    }
}
