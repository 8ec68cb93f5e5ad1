use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::{
    AckHandle, ChannelError, DeadLetter, Delivery, DeliveryStream, ReservationChannel,
    ReservationMessage, Result,
};

#[derive(Debug, Clone)]
struct QueuedMessage {
    id: u64,
    payload: serde_json::Value,
    available_at: Instant,
    delivery_count: u32,
}

#[derive(Debug, Default)]
struct ChannelState {
    ready: Vec<QueuedMessage>,
    in_flight: HashMap<u64, QueuedMessage>,
    published: Vec<serde_json::Value>,
    dead_letters: Vec<DeadLetter>,
    next_id: u64,
    failing_publishes: u32,
    failing_rejects: u32,
    closed: bool,
}

impl ChannelState {
    fn enqueue(&mut self, payload: serde_json::Value, available_at: Instant) {
        self.next_id += 1;
        self.ready.push(QueuedMessage {
            id: self.next_id,
            payload,
            available_at,
            delivery_count: 0,
        });
    }

    /// Removes the oldest message that is due, marking it in flight.
    fn take_due(&mut self, now: Instant) -> Option<QueuedMessage> {
        let index = self
            .ready
            .iter()
            .enumerate()
            .filter(|(_, m)| m.available_at <= now)
            .min_by_key(|(_, m)| (m.available_at, m.id))
            .map(|(i, _)| i)?;

        let mut message = self.ready.swap_remove(index);
        message.delivery_count += 1;
        self.in_flight.insert(message.id, message.clone());
        Some(message)
    }

    fn is_drained(&self) -> bool {
        self.ready.is_empty() && self.in_flight.is_empty()
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<ChannelState>,
    changed: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory reservation channel for testing and single-process runs.
///
/// Behaves like the durable channel from a consumer's point of view:
/// delayed publishes, redelivery of nacked messages, and dead-lettering.
/// Dropping a delivery without settling it puts the message back at once,
/// which is how tests simulate a worker crashing before its ack.
#[derive(Debug, Clone, Default)]
pub struct InMemoryChannel {
    shared: Arc<Shared>,
}

impl InMemoryChannel {
    /// Creates a new empty channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a raw payload without encoding it.
    pub fn publish_raw(&self, payload: serde_json::Value) {
        let mut state = self.shared.lock();
        state.published.push(payload.clone());
        state.enqueue(payload, Instant::now());
        drop(state);
        self.shared.changed.notify_waiters();
    }

    /// Returns every successfully decoded message ever published, in order.
    pub fn published(&self) -> Vec<ReservationMessage> {
        self.shared
            .lock()
            .published
            .iter()
            .filter_map(|p| ReservationMessage::decode(p).ok())
            .collect()
    }

    /// Number of messages waiting for delivery, due or not.
    pub fn queued_count(&self) -> usize {
        self.shared.lock().ready.len()
    }

    /// Number of messages handed out and not yet settled.
    pub fn in_flight_count(&self) -> usize {
        self.shared.lock().in_flight.len()
    }

    /// Makes the next `count` publishes fail with `Unavailable`.
    pub fn fail_next_publishes(&self, count: u32) {
        self.shared.lock().failing_publishes = count;
    }

    /// Makes the next `count` rejects fail with `Unavailable`. The failed
    /// delivery stays unsettled and comes back once it is dropped.
    pub fn fail_next_rejects(&self, count: u32) {
        self.shared.lock().failing_rejects = count;
    }

    /// Ends every consumer stream once no message is queued or in flight.
    pub fn close(&self) {
        self.shared.lock().closed = true;
        self.shared.changed.notify_waiters();
    }

    async fn next_delivery(&self) -> Option<Delivery> {
        loop {
            let changed = self.shared.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            let next_due = {
                let mut state = self.shared.lock();
                if let Some(message) = state.take_due(Instant::now()) {
                    let handle = InMemoryAck {
                        shared: Arc::clone(&self.shared),
                        id: message.id,
                        settled: false,
                    };
                    return Some(Delivery::new(
                        message.payload,
                        message.delivery_count,
                        Box::new(handle),
                    ));
                }
                if state.closed && state.is_drained() {
                    return None;
                }
                state.ready.iter().map(|m| m.available_at).min()
            };

            match next_due {
                Some(at) => {
                    tokio::select! {
                        _ = &mut changed => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => changed.await,
            }
        }
    }
}

#[async_trait]
impl ReservationChannel for InMemoryChannel {
    async fn publish_delayed(&self, message: &ReservationMessage, delay: Duration) -> Result<()> {
        let payload = message.encode()?;

        let mut state = self.shared.lock();
        if state.failing_publishes > 0 {
            state.failing_publishes -= 1;
            return Err(ChannelError::Unavailable(
                "injected publish failure".to_string(),
            ));
        }
        state.published.push(payload.clone());
        state.enqueue(payload, Instant::now() + delay);
        drop(state);

        self.shared.changed.notify_waiters();
        Ok(())
    }

    async fn consume(&self) -> Result<DeliveryStream> {
        let stream = futures_util::stream::unfold(self.clone(), |channel| async move {
            let delivery = channel.next_delivery().await?;
            Some((Ok(delivery), channel))
        });
        Ok(Box::pin(stream))
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        Ok(self.shared.lock().dead_letters.clone())
    }
}

struct InMemoryAck {
    shared: Arc<Shared>,
    id: u64,
    settled: bool,
}

impl InMemoryAck {
    fn settle(&mut self, apply: impl FnOnce(&mut ChannelState, QueuedMessage)) {
        self.settled = true;
        let mut state = self.shared.lock();
        if let Some(message) = state.in_flight.remove(&self.id) {
            apply(&mut *state, message);
        }
        drop(state);
        self.shared.changed.notify_waiters();
    }

    fn requeue_after(&mut self, delay: Duration) {
        self.settle(|state, mut message| {
            message.available_at = Instant::now() + delay;
            state.ready.push(message);
        });
    }
}

#[async_trait]
impl AckHandle for InMemoryAck {
    async fn ack(self: Box<Self>) -> Result<()> {
        let mut this = self;
        this.settle(|_, _| {});
        Ok(())
    }

    async fn nack(self: Box<Self>, requeue_delay: Duration) -> Result<()> {
        let mut this = self;
        this.requeue_after(requeue_delay);
        Ok(())
    }

    async fn reject(self: Box<Self>, reason: String) -> Result<()> {
        let mut this = self;
        {
            let mut state = this.shared.lock();
            if state.failing_rejects > 0 {
                state.failing_rejects -= 1;
                return Err(ChannelError::Unavailable(
                    "injected reject failure".to_string(),
                ));
            }
        }
        this.settle(|state, message| {
            state.dead_letters.push(DeadLetter {
                order_id: ReservationMessage::peek_order_id(&message.payload),
                payload: message.payload,
                reason,
                dead_lettered_at: Utc::now(),
            });
        });
        Ok(())
    }
}

impl Drop for InMemoryAck {
    fn drop(&mut self) {
        if !self.settled {
            self.requeue_after(Duration::ZERO);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Money, OrderId};
    use domain::{LineItem, LineItemRequest};
    use futures_util::StreamExt;

    fn message() -> ReservationMessage {
        ReservationMessage::new(
            OrderId::new(),
            vec![LineItem::resolve(
                LineItemRequest::new("prod-1", "sku-1", 1),
                Money::from_cents(500),
                0,
            )],
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_publish_consume_ack() {
        let channel = InMemoryChannel::new();
        let msg = message();
        channel.publish(&msg).await.unwrap();

        let mut stream = channel.consume().await.unwrap();
        let delivery = stream.next().await.unwrap().unwrap();
        assert_eq!(delivery.message().unwrap(), msg);
        assert_eq!(delivery.delivery_count(), 1);
        assert_eq!(channel.in_flight_count(), 1);

        delivery.ack().await.unwrap();
        assert_eq!(channel.in_flight_count(), 0);
        assert_eq!(channel.queued_count(), 0);
    }

    #[tokio::test]
    async fn test_nack_redelivers() {
        let channel = InMemoryChannel::new();
        channel.publish(&message()).await.unwrap();
        let mut stream = channel.consume().await.unwrap();

        let first = stream.next().await.unwrap().unwrap();
        first.nack(Duration::ZERO).await.unwrap();

        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.delivery_count(), 2);
        second.ack().await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_delivery_is_redelivered() {
        let channel = InMemoryChannel::new();
        let msg = message();
        channel.publish(&msg).await.unwrap();
        let mut stream = channel.consume().await.unwrap();

        drop(stream.next().await.unwrap().unwrap());
        assert_eq!(channel.queued_count(), 1);

        let again = stream.next().await.unwrap().unwrap();
        assert_eq!(again.message().unwrap(), msg);
        assert_eq!(again.delivery_count(), 2);
        again.ack().await.unwrap();
    }

    #[tokio::test]
    async fn test_reject_dead_letters() {
        let channel = InMemoryChannel::new();
        let msg = message();
        channel.publish(&msg).await.unwrap();
        let mut stream = channel.consume().await.unwrap();

        let delivery = stream.next().await.unwrap().unwrap();
        delivery.reject("retries exhausted").await.unwrap();

        let dead = channel.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].order_id, Some(msg.order_id));
        assert_eq!(dead[0].reason, "retries exhausted");
        assert_eq!(channel.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_delayed_publish_waits() {
        let channel = InMemoryChannel::new();
        let delay = Duration::from_millis(50);
        let started = Instant::now();
        channel.publish_delayed(&message(), delay).await.unwrap();

        let mut stream = channel.consume().await.unwrap();
        let delivery = stream.next().await.unwrap().unwrap();
        assert!(started.elapsed() >= delay);
        delivery.ack().await.unwrap();
    }

    #[tokio::test]
    async fn test_consumer_wakes_on_publish() {
        let channel = InMemoryChannel::new();
        let mut stream = channel.consume().await.unwrap();

        let publisher = channel.clone();
        let msg = message();
        let expected = msg.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            publisher.publish(&msg).await.unwrap();
        });

        let delivery = stream.next().await.unwrap().unwrap();
        assert_eq!(delivery.message().unwrap(), expected);
        delivery.ack().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_ends_stream_after_drain() {
        let channel = InMemoryChannel::new();
        channel.publish(&message()).await.unwrap();
        channel.close();

        let mut stream = channel.consume().await.unwrap();
        let delivery = stream.next().await.unwrap().unwrap();
        delivery.ack().await.unwrap();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_injected_publish_failure() {
        let channel = InMemoryChannel::new();
        channel.fail_next_publishes(1);

        let result = channel.publish(&message()).await;
        assert!(matches!(result, Err(ChannelError::Unavailable(_))));
        assert!(channel.published().is_empty());

        channel.publish(&message()).await.unwrap();
        assert_eq!(channel.published().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_reject_redelivers() {
        let channel = InMemoryChannel::new();
        let msg = message();
        channel.publish(&msg).await.unwrap();
        channel.fail_next_rejects(1);
        let mut stream = channel.consume().await.unwrap();

        let delivery = stream.next().await.unwrap().unwrap();
        let result = delivery.reject("retries exhausted").await;
        assert!(matches!(result, Err(ChannelError::Unavailable(_))));
        assert!(channel.dead_letters().await.unwrap().is_empty());

        let again = stream.next().await.unwrap().unwrap();
        assert_eq!(again.delivery_count(), 2);
        again.reject("retries exhausted").await.unwrap();
        assert_eq!(channel.dead_letters().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_raw_payload_is_delivered_undecoded() {
        let channel = InMemoryChannel::new();
        channel.publish_raw(serde_json::json!({"garbage": true}));

        let mut stream = channel.consume().await.unwrap();
        let delivery = stream.next().await.unwrap().unwrap();
        assert!(matches!(delivery.message(), Err(ChannelError::Decode(_))));
        delivery.reject("malformed").await.unwrap();

        let dead = channel.dead_letters().await.unwrap();
        assert_eq!(dead[0].order_id, None);
    }
}
