use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::OrderId;
use tokio::sync::RwLock;

use super::{AttemptClaim, OrderStore};
use crate::error::DomainError;
use crate::order::{NewOrder, Order, OrderStatus};

#[derive(Debug, Default)]
struct InMemoryOrderState {
    orders: HashMap<OrderId, Order>,
    history: HashMap<OrderId, Vec<OrderStatus>>,
    failing_creates: u32,
    failing_claims: u32,
}

/// In-memory order store for testing.
///
/// Records every status an order passes through so tests can check that
/// statuses only move forward.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<InMemoryOrderState>>,
}

impl InMemoryOrderStore {
    /// Creates a new empty order store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    /// Returns the statuses an order has held, oldest first.
    pub async fn status_history(&self, order_id: OrderId) -> Vec<OrderStatus> {
        self.state
            .read()
            .await
            .history
            .get(&order_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Makes the next `count` create calls fail with `Unavailable`.
    pub async fn fail_next_creates(&self, count: u32) {
        self.state.write().await.failing_creates = count;
    }

    /// Makes the next `count` claim calls fail with `Unavailable`.
    pub async fn fail_next_claims(&self, count: u32) {
        self.state.write().await.failing_claims = count;
    }

    /// Inserts an order as-is, bypassing intake. Useful for seeding old
    /// pending orders in tests.
    pub async fn insert(&self, order: Order) {
        let mut state = self.state.write().await;
        state.history.insert(order.id, vec![order.status]);
        state.orders.insert(order.id, order);
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create_order(&self, order: NewOrder) -> Result<OrderId, DomainError> {
        let mut state = self.state.write().await;

        if state.failing_creates > 0 {
            state.failing_creates -= 1;
            return Err(DomainError::Unavailable("injected create failure".to_string()));
        }

        let order_id = OrderId::new();
        let order = order.into_order(order_id);
        state.history.insert(order_id, vec![order.status]);
        state.orders.insert(order_id, order);
        Ok(order_id)
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>, DomainError> {
        Ok(self.state.read().await.orders.get(&order_id).cloned())
    }

    async fn update_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<(), DomainError> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or(DomainError::OrderNotFound(order_id))?;

        if !order.status.can_transition_to(status) {
            return Err(DomainError::InvalidStatusTransition {
                order_id,
                from: order.status,
                to: status,
            });
        }

        order.status = status;
        state.history.entry(order_id).or_default().push(status);
        Ok(())
    }

    async fn claim_reservation_attempt(
        &self,
        order_id: OrderId,
        retry_count: u32,
    ) -> Result<AttemptClaim, DomainError> {
        let mut state = self.state.write().await;

        if state.failing_claims > 0 {
            state.failing_claims -= 1;
            return Err(DomainError::Unavailable("injected claim failure".to_string()));
        }

        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or(DomainError::OrderNotFound(order_id))?;

        if !order.status.accepts_reservation() || order.reservation_attempts > retry_count {
            return Ok(AttemptClaim::Duplicate {
                status: order.status,
                attempts: order.reservation_attempts,
            });
        }

        let previous = order.status;
        order.status = OrderStatus::Processing;
        order.reservation_attempts = retry_count + 1;
        if previous != OrderStatus::Processing {
            state
                .history
                .entry(order_id)
                .or_default()
                .push(OrderStatus::Processing);
        }
        Ok(AttemptClaim::Claimed)
    }

    async fn release_reservation_attempt(
        &self,
        order_id: OrderId,
        retry_count: u32,
    ) -> Result<bool, DomainError> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or(DomainError::OrderNotFound(order_id))?;

        if order.status != OrderStatus::Processing || order.reservation_attempts != retry_count + 1
        {
            return Ok(false);
        }
        order.reservation_attempts = retry_count;
        Ok(true)
    }

    async fn find_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>, DomainError> {
        let state = self.state.read().await;
        let mut stale: Vec<Order> = state
            .orders
            .values()
            .filter(|o| {
                o.status == OrderStatus::Pending
                    && o.reservation_attempts == 0
                    && o.created_at < created_before
            })
            .cloned()
            .collect();
        stale.sort_by_key(|o| o.created_at);
        stale.truncate(limit);
        Ok(stale)
    }
}
