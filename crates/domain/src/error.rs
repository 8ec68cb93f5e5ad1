//! Domain error types.

use common::OrderId;
use thiserror::Error;

use crate::order::OrderStatus;

/// Errors that can occur during order store operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// No order exists with this ID.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The requested status change is not allowed by the state machine.
    #[error("Invalid status transition for order {order_id}: {from} -> {to}")]
    InvalidStatusTransition {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },

    /// A stored row could not be mapped onto an order.
    #[error("Corrupt order row {order_id}: {reason}")]
    CorruptRow { order_id: OrderId, reason: String },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store is temporarily unavailable.
    #[error("Order store unavailable: {0}")]
    Unavailable(String),
}
