use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::OrderId;
use futures_core::Stream;

use crate::{ReservationMessage, Result};

/// A stream of deliveries from a channel.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery>> + Send>>;

/// Settles one delivery with the channel it came from.
#[async_trait]
pub trait AckHandle: Send {
    /// Removes the message from the channel.
    async fn ack(self: Box<Self>) -> Result<()>;

    /// Makes the message deliverable again after `requeue_delay`.
    async fn nack(self: Box<Self>, requeue_delay: Duration) -> Result<()>;

    /// Moves the message to the dead-letter store.
    async fn reject(self: Box<Self>, reason: String) -> Result<()>;
}

/// A message handed to one consumer.
///
/// The payload is kept raw so that a malformed message can still be
/// dead-lettered as received.
pub struct Delivery {
    payload: serde_json::Value,
    delivery_count: u32,
    handle: Box<dyn AckHandle>,
}

impl Delivery {
    /// Creates a delivery from a raw payload and its settlement handle.
    pub fn new(payload: serde_json::Value, delivery_count: u32, handle: Box<dyn AckHandle>) -> Self {
        Self {
            payload,
            delivery_count,
            handle,
        }
    }

    /// Returns the raw payload.
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// How many times this message has been handed out, this time included.
    pub fn delivery_count(&self) -> u32 {
        self.delivery_count
    }

    /// Decodes the payload.
    pub fn message(&self) -> Result<ReservationMessage> {
        ReservationMessage::decode(&self.payload)
    }

    pub async fn ack(self) -> Result<()> {
        self.handle.ack().await
    }

    pub async fn nack(self, requeue_delay: Duration) -> Result<()> {
        self.handle.nack(requeue_delay).await
    }

    pub async fn reject(self, reason: impl Into<String>) -> Result<()> {
        self.handle.reject(reason.into()).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("payload", &self.payload)
            .field("delivery_count", &self.delivery_count)
            .finish_non_exhaustive()
    }
}

/// A message that was rejected instead of processed.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    /// Present when the payload carried a readable order id.
    pub order_id: Option<OrderId>,
    pub payload: serde_json::Value,
    pub reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}

/// Core trait for reservation channel implementations.
///
/// Delivery is at-least-once: a message that is neither acked nor rejected is
/// eventually delivered again, possibly to another consumer.
#[async_trait]
pub trait ReservationChannel: Send + Sync {
    /// Publishes a message for immediate delivery.
    async fn publish(&self, message: &ReservationMessage) -> Result<()> {
        self.publish_delayed(message, Duration::ZERO).await
    }

    /// Publishes a message that becomes deliverable after `delay`.
    async fn publish_delayed(&self, message: &ReservationMessage, delay: Duration) -> Result<()>;

    /// Opens a new consumer stream.
    async fn consume(&self) -> Result<DeliveryStream>;

    /// Lists dead-lettered messages, oldest first.
    async fn dead_letters(&self) -> Result<Vec<DeadLetter>>;
}

#[async_trait]
impl<T: ReservationChannel + ?Sized> ReservationChannel for std::sync::Arc<T> {
    async fn publish(&self, message: &ReservationMessage) -> Result<()> {
        (**self).publish(message).await
    }

    async fn publish_delayed(&self, message: &ReservationMessage, delay: Duration) -> Result<()> {
        (**self).publish_delayed(message, delay).await
    }

    async fn consume(&self) -> Result<DeliveryStream> {
        (**self).consume().await
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        (**self).dead_letters().await
    }
}
