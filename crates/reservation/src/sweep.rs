use std::time::Duration;

use channel::{ReservationChannel, ReservationMessage};
use chrono::{DateTime, Utc};
use domain::OrderStore;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::error::Result;

const DEFAULT_BATCH_SIZE: usize = 100;

/// Republishes reservation messages for orders that intake persisted but
/// never managed to publish.
///
/// Only `pending` orders with no claimed attempt and older than
/// `stale_after` are picked up. Publishing a duplicate for an order whose
/// original message is merely slow is harmless: the second delivery loses
/// the attempt claim and is skipped.
pub struct PendingOrderSweep<O, C> {
    orders: O,
    channel: C,
    stale_after: Duration,
    batch_size: usize,
}

impl<O, C> PendingOrderSweep<O, C>
where
    O: OrderStore,
    C: ReservationChannel,
{
    pub fn new(orders: O, channel: C, stale_after: Duration) -> Self {
        Self {
            orders,
            channel,
            stale_after,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Sets how many orders one pass republishes at most.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Runs one pass and returns how many orders were republished.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_once(&self) -> Result<usize> {
        let stale_after = chrono::Duration::from_std(self.stale_after)
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(stale_after)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let stale = self
            .orders
            .find_stale_pending(cutoff, self.batch_size)
            .await?;

        let mut republished = 0;
        for order in &stale {
            self.channel
                .publish(&ReservationMessage::for_order(order))
                .await?;
            republished += 1;
            metrics::counter!("orders_swept_total").increment(1);
            tracing::info!(order_id = %order.id, created_at = %order.created_at, "republished stale pending order");
        }

        Ok(republished)
    }

    /// Sweeps every `interval` until shutdown is signalled. A zero interval
    /// disables the sweep.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        if interval.is_zero() {
            tracing::info!("pending order sweep disabled");
            return;
        }

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        tracing::warn!(error = %e, "pending order sweep failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use channel::InMemoryChannel;
    use common::{Money, OrderId, OwnerId};
    use domain::{
        InMemoryOrderStore, LineItem, LineItemRequest, NewOrder, Order, PaymentMethod,
        ShippingAddress, ValidatedRequest,
    };

    fn order(age: chrono::Duration) -> Order {
        let request = ValidatedRequest {
            owner_id: OwnerId::new("user-1"),
            shipping_address: ShippingAddress::new("1 Main", "Metropolis", "NY", "10001"),
            items: vec![],
            payment_method: PaymentMethod::new("credit_card"),
        };
        let items = vec![LineItem::resolve(
            LineItemRequest::new("prod-1", "sku-1", 1),
            Money::from_cents(100),
            0,
        )];
        NewOrder::new(request, items)
            .created_at(Utc::now() - age)
            .into_order(OrderId::new())
    }

    #[tokio::test]
    async fn test_republishes_only_stale_unattempted_orders() {
        let orders = InMemoryOrderStore::new();
        let channel = InMemoryChannel::new();

        let stale = order(chrono::Duration::minutes(10));
        let fresh = order(chrono::Duration::seconds(5));
        let mut attempted = order(chrono::Duration::minutes(10));
        attempted.reservation_attempts = 1;
        for o in [stale.clone(), fresh, attempted] {
            orders.insert(o).await;
        }

        let sweep = PendingOrderSweep::new(orders, channel.clone(), Duration::from_secs(300));
        assert_eq!(sweep.sweep_once().await.unwrap(), 1);

        let published = channel.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].order_id, stale.id);
        assert_eq!(published[0].retry_count, 0);
        assert_eq!(published[0].items, stale.items);
    }

    #[tokio::test]
    async fn test_batch_size_limits_a_pass() {
        let orders = InMemoryOrderStore::new();
        let channel = InMemoryChannel::new();
        for _ in 0..5 {
            orders.insert(order(chrono::Duration::minutes(10))).await;
        }

        let sweep = PendingOrderSweep::new(orders, channel.clone(), Duration::from_secs(60))
            .with_batch_size(2);
        assert_eq!(sweep.sweep_once().await.unwrap(), 2);
        assert_eq!(channel.published().len(), 2);
    }

    #[tokio::test]
    async fn test_publish_failure_is_reported() {
        let orders = InMemoryOrderStore::new();
        let channel = InMemoryChannel::new();
        orders.insert(order(chrono::Duration::minutes(10))).await;
        channel.fail_next_publishes(1);

        let sweep = PendingOrderSweep::new(orders, channel, Duration::from_secs(60));
        assert!(sweep.sweep_once().await.is_err());
    }
}
