//! Order persistence.

mod memory;
mod postgres;

pub use memory::InMemoryOrderStore;
pub use postgres::PostgresOrderStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::OrderId;

use crate::error::DomainError;
use crate::order::{NewOrder, Order, OrderStatus};

/// Outcome of trying to claim a reservation attempt for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptClaim {
    /// The attempt is ours; the order is now `processing`.
    Claimed,
    /// This attempt was already claimed, or the order no longer accepts
    /// reservations. Nothing was changed.
    Duplicate { status: OrderStatus, attempts: u32 },
}

/// Core trait for order store implementations.
///
/// Writers of the same order never race in normal operation, but every
/// status write is still conditional on the current state.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists a new order in `pending` status and returns its assigned id.
    async fn create_order(&self, order: NewOrder) -> Result<OrderId, DomainError>;

    /// Loads an order by id. Returns None if it doesn't exist.
    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>, DomainError>;

    /// Moves an order to `status`.
    ///
    /// Fails with `InvalidStatusTransition` unless the state machine allows
    /// the move from the current status, and `OrderNotFound` for unknown ids.
    async fn update_status(&self, order_id: OrderId, status: OrderStatus)
    -> Result<(), DomainError>;

    /// Claims the reservation attempt carried by a message with `retry_count`.
    ///
    /// Succeeds only while the order is `pending` or `processing` and no
    /// attempt with this or a later retry count has been claimed; on success
    /// the order becomes `processing` and its attempt count `retry_count + 1`.
    async fn claim_reservation_attempt(
        &self,
        order_id: OrderId,
        retry_count: u32,
    ) -> Result<AttemptClaim, DomainError>;

    /// Gives back an attempt claimed with `retry_count`, so that a redelivery
    /// of the same message can claim it again.
    ///
    /// Only succeeds while the order is `processing` with exactly
    /// `retry_count + 1` attempts. Returns whether anything changed.
    async fn release_reservation_attempt(
        &self,
        order_id: OrderId,
        retry_count: u32,
    ) -> Result<bool, DomainError>;

    /// Lists `pending` orders created before `created_before` that never had a
    /// reservation attempt, oldest first.
    async fn find_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>, DomainError>;
}

#[async_trait]
impl<T: OrderStore + ?Sized> OrderStore for std::sync::Arc<T> {
    async fn create_order(&self, order: NewOrder) -> Result<OrderId, DomainError> {
        (**self).create_order(order).await
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>, DomainError> {
        (**self).get_order(order_id).await
    }

    async fn update_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<(), DomainError> {
        (**self).update_status(order_id, status).await
    }

    async fn claim_reservation_attempt(
        &self,
        order_id: OrderId,
        retry_count: u32,
    ) -> Result<AttemptClaim, DomainError> {
        (**self).claim_reservation_attempt(order_id, retry_count).await
    }

    async fn release_reservation_attempt(
        &self,
        order_id: OrderId,
        retry_count: u32,
    ) -> Result<bool, DomainError> {
        (**self).release_reservation_attempt(order_id, retry_count).await
    }

    async fn find_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>, DomainError> {
        (**self).find_stale_pending(created_before, limit).await
    }
}
