//! The reservation worker: one attempt per delivery.

use std::time::Instant;

use channel::{Delivery, ReservationChannel, ReservationMessage};
use common::OrderId;
use domain::{AttemptClaim, DomainError, LineItem, OrderStatus, OrderStore};
use futures_util::StreamExt;
use inventory::InventoryStore;
use tokio::sync::watch;
use tracing::field;

use crate::error::{ReservationError, Result};
use crate::retry::RetryPolicy;

/// What the worker did with one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Every item was reserved; the order stays `processing`.
    Reserved,
    /// The attempt was already claimed, or the order no longer accepts
    /// reservations.
    Skipped,
    /// The attempt failed and a message with `retry_count` was published.
    Retried { retry_count: u32 },
    /// The message went back to the channel unchanged: either the retry
    /// could not be published, or the attempt could not be claimed.
    Requeued,
    /// The message was moved to the dead-letter store.
    DeadLettered { reason: String },
}

/// Stock is only touched by a claimed attempt.
enum Attempt {
    Claimed(Result<()>),
    Unclaimed(ReservationError),
}

/// Consumes reservation messages and reserves stock for their orders.
///
/// Every delivery has to win [`OrderStore::claim_reservation_attempt`] before
/// stock is touched, so duplicate deliveries of one attempt reserve nothing.
/// Items are reserved in order; the first failure releases the items this
/// attempt already reserved.
pub struct ReservationWorker<O, I, C> {
    orders: O,
    inventory: I,
    channel: C,
    policy: RetryPolicy,
}

impl<O, I, C> ReservationWorker<O, I, C>
where
    O: OrderStore,
    I: InventoryStore,
    C: ReservationChannel,
{
    /// Creates a new reservation worker.
    pub fn new(orders: O, inventory: I, channel: C, policy: RetryPolicy) -> Self {
        Self {
            orders,
            inventory,
            channel,
            policy,
        }
    }

    /// Returns the retry policy in use.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Consumes deliveries until `shutdown` flips to true or the channel
    /// stream ends. A delivery being handled when shutdown is requested is
    /// settled first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut deliveries = self.channel.consume().await?;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let next = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                next = deliveries.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    if let Err(e) = self.handle(delivery).await {
                        tracing::error!(error = %e, "failed to settle reservation delivery");
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "error while consuming reservation channel");
                }
                None => break,
            }
        }

        Ok(())
    }

    /// Processes one delivery and settles it.
    ///
    /// Errors are returned only when the delivery itself could not be
    /// settled; the channel then redelivers it.
    #[tracing::instrument(
        skip_all,
        fields(
            delivery_count = delivery.delivery_count(),
            order_id = field::Empty,
            retry_count = field::Empty,
        )
    )]
    pub async fn handle(&self, delivery: Delivery) -> Result<Outcome> {
        let message = match delivery.message() {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "malformed reservation message");
                return self.dead_letter(delivery, e.to_string()).await;
            }
        };

        let span = tracing::Span::current();
        span.record("order_id", field::display(message.order_id));
        span.record("retry_count", message.retry_count);

        if self.policy.is_exhausted(message.retry_count) {
            self.mark_failed_best_effort(message.order_id).await;
            let reason = ReservationError::RetryExhausted {
                order_id: message.order_id,
                retry_count: message.retry_count,
            };
            return self.dead_letter(delivery, reason.to_string()).await;
        }

        let started = Instant::now();
        metrics::counter!("reservation_attempts_total").increment(1);

        let attempt = match self
            .orders
            .claim_reservation_attempt(message.order_id, message.retry_count)
            .await
        {
            Ok(AttemptClaim::Claimed) => Attempt::Claimed(
                self.reserve_items(message.order_id, &message.items).await,
            ),
            Ok(AttemptClaim::Duplicate { status, attempts }) => {
                return self.skip_duplicate(delivery, &message, status, attempts).await;
            }
            Err(DomainError::OrderNotFound(order_id)) => {
                let reason = ReservationError::OrderNotFound(order_id);
                return self.dead_letter(delivery, reason.to_string()).await;
            }
            Err(e) => Attempt::Unclaimed(e.into()),
        };

        let outcome = match attempt {
            Attempt::Claimed(Ok(())) => {
                delivery.ack().await?;
                metrics::counter!("reservations_succeeded_total").increment(1);
                tracing::info!(items = message.items.len(), "stock reserved");
                Ok(Outcome::Reserved)
            }
            Attempt::Claimed(Err(cause)) => self.retry_or_fail(delivery, &message, cause).await,
            Attempt::Unclaimed(cause) => self.requeue_unclaimed(delivery, &message, cause).await,
        };

        metrics::histogram!("reservation_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        outcome
    }

    /// Settles a delivery whose attempt was already claimed.
    ///
    /// The last attempt of a failed order is dead-lettered rather than
    /// acked: it only comes back here when its earlier reject did not
    /// complete.
    async fn skip_duplicate(
        &self,
        delivery: Delivery,
        message: &ReservationMessage,
        status: OrderStatus,
        attempts: u32,
    ) -> Result<Outcome> {
        let last_attempt = self.policy.is_exhausted(message.next_retry().retry_count);
        if status == OrderStatus::Failed && last_attempt {
            tracing::warn!(attempts, "last attempt of a failed order redelivered");
            let reason = ReservationError::RetryExhausted {
                order_id: message.order_id,
                retry_count: message.retry_count,
            };
            return self.dead_letter(delivery, reason.to_string()).await;
        }

        tracing::info!(%status, attempts, "attempt already claimed, skipping");
        metrics::counter!("reservation_duplicates_skipped_total").increment(1);
        delivery.ack().await?;
        Ok(Outcome::Skipped)
    }

    async fn reserve_items(&self, order_id: OrderId, items: &[LineItem]) -> Result<()> {
        for (index, item) in items.iter().enumerate() {
            if let Err(e) = self
                .inventory
                .reserve_stock(&item.product_id, &item.sku, item.quantity)
                .await
            {
                tracing::warn!(
                    %order_id,
                    product_id = %item.product_id,
                    sku = %item.sku,
                    quantity = item.quantity,
                    error = %e,
                    "stock reservation failed"
                );
                self.roll_back(order_id, &items[..index]).await;
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Releases items reserved earlier in this attempt, newest first.
    /// Release failures are logged and counted, never propagated.
    async fn roll_back(&self, order_id: OrderId, reserved: &[LineItem]) {
        if reserved.is_empty() {
            return;
        }
        metrics::counter!("stock_rollbacks_total").increment(1);

        for item in reserved.iter().rev() {
            if let Err(e) = self
                .inventory
                .release_stock(&item.product_id, &item.sku, item.quantity)
                .await
            {
                metrics::counter!("stock_release_failures_total").increment(1);
                tracing::error!(
                    %order_id,
                    product_id = %item.product_id,
                    sku = %item.sku,
                    quantity = item.quantity,
                    error = %e,
                    "failed to release stock during rollback"
                );
            }
        }
    }

    async fn retry_or_fail(
        &self,
        delivery: Delivery,
        message: &ReservationMessage,
        cause: ReservationError,
    ) -> Result<Outcome> {
        metrics::counter!("reservations_failed_total").increment(1);
        let next = message.next_retry();

        if self.policy.is_exhausted(next.retry_count) {
            tracing::warn!(error = %cause, "reservation failed, no retries left");
            self.mark_failed_best_effort(message.order_id).await;
            let exhausted = ReservationError::RetryExhausted {
                order_id: message.order_id,
                retry_count: message.retry_count,
            };
            return self
                .dead_letter(delivery, format!("{exhausted}: {cause}"))
                .await;
        }

        let delay = self.policy.backoff(next.retry_count);
        match self.channel.publish_delayed(&next, delay).await {
            Ok(()) => {
                delivery.ack().await?;
                metrics::counter!("reservation_retries_total").increment(1);
                tracing::warn!(
                    error = %cause,
                    next_retry = next.retry_count,
                    ?delay,
                    "reservation failed, retry scheduled"
                );
                Ok(Outcome::Retried {
                    retry_count: next.retry_count,
                })
            }
            Err(publish_error) => {
                tracing::error!(
                    error = %cause,
                    %publish_error,
                    "could not publish retry, returning message to channel"
                );
                // The redelivered message carries the same retry count, so
                // the claim has to be given back for it to be processed.
                if let Err(e) = self
                    .orders
                    .release_reservation_attempt(message.order_id, message.retry_count)
                    .await
                {
                    tracing::error!(error = %e, "failed to release reservation attempt");
                }
                delivery.nack(delay).await?;
                Ok(Outcome::Requeued)
            }
        }
    }

    /// Returns a delivery whose claim could not be decided to the channel.
    ///
    /// No retry is published: another delivery may hold the claim, and a
    /// message with the next retry count would win a claim of its own.
    async fn requeue_unclaimed(
        &self,
        delivery: Delivery,
        message: &ReservationMessage,
        cause: ReservationError,
    ) -> Result<Outcome> {
        let delay = self.policy.backoff(message.next_retry().retry_count);
        tracing::warn!(
            error = %cause,
            ?delay,
            "could not claim attempt, returning message to channel"
        );
        delivery.nack(delay).await?;
        Ok(Outcome::Requeued)
    }

    /// Moves the order to `failed`, passing through `processing` if no
    /// attempt ever claimed it. Finished orders are left alone.
    async fn mark_failed(&self, order_id: OrderId) -> std::result::Result<(), DomainError> {
        match self.orders.update_status(order_id, OrderStatus::Failed).await {
            Ok(()) => Ok(()),
            Err(DomainError::InvalidStatusTransition {
                from: OrderStatus::Pending,
                ..
            }) => {
                self.orders
                    .update_status(order_id, OrderStatus::Processing)
                    .await?;
                self.orders.update_status(order_id, OrderStatus::Failed).await
            }
            Err(DomainError::InvalidStatusTransition { from, .. }) if from.is_terminal() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn mark_failed_best_effort(&self, order_id: OrderId) {
        if let Err(e) = self.mark_failed(order_id).await {
            metrics::counter!("order_status_update_failures_total").increment(1);
            tracing::error!(%order_id, error = %e, "failed to mark order failed");
        }
    }

    async fn dead_letter(&self, delivery: Delivery, reason: String) -> Result<Outcome> {
        delivery.reject(reason.clone()).await?;
        metrics::counter!("reservations_dead_lettered_total").increment(1);
        tracing::warn!(%reason, "reservation message dead-lettered");
        Ok(Outcome::DeadLettered { reason })
    }
}
