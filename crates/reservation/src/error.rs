//! Intake and reservation error types.

use channel::ChannelError;
use common::{OrderId, ProductId, Sku};
use domain::{DomainError, OrderError};
use inventory::InventoryError;
use thiserror::Error;

/// A failure of one of the stores behind intake or the worker.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error(transparent)]
    Orders(#[from] DomainError),
}

/// Why an order was not accepted.
///
/// Every variant except `Publish` means nothing was persisted.
#[derive(Debug, Error)]
pub enum IntakeError {
    /// The request is missing a field or has a malformed one.
    #[error("Invalid order: {0}")]
    Validation(#[from] OrderError),

    /// A referenced product or SKU does not exist.
    #[error("Item {index}: product {product_id}, sku {sku} not found")]
    ItemNotFound {
        index: usize,
        product_id: ProductId,
        sku: Sku,
    },

    /// Not enough stock at validation time. Advisory only; the reservation
    /// itself may still fail later.
    #[error(
        "Item {index}: insufficient stock for product {product_id}, sku {sku}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        index: usize,
        product_id: ProductId,
        sku: Sku,
        requested: u32,
        available: u32,
    },

    /// An inventory or order store operation failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The order was persisted but its reservation message was not published.
    /// It stays `pending` until the pending-order sweep republishes it.
    #[error("Order {order_id} persisted but reservation message not published: {source}")]
    Publish {
        order_id: OrderId,
        #[source]
        source: ChannelError,
    },
}

impl IntakeError {
    /// Short label used as the `reason` metric label.
    pub fn reason(&self) -> &'static str {
        match self {
            IntakeError::Validation(_) => "validation",
            IntakeError::ItemNotFound { .. } => "item_not_found",
            IntakeError::InsufficientStock { .. } => "insufficient_stock",
            IntakeError::Store(_) => "store",
            IntakeError::Publish { .. } => "publish",
        }
    }
}

/// Errors raised while handling a reservation delivery.
#[derive(Debug, Error)]
pub enum ReservationError {
    /// The message has used up its retry budget.
    #[error("Retries exhausted for order {order_id} after {retry_count} retries")]
    RetryExhausted { order_id: OrderId, retry_count: u32 },

    /// The message refers to an order that does not exist.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// Reserving or releasing stock failed.
    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    /// An order store operation failed.
    #[error("Order store error: {0}")]
    Orders(#[from] DomainError),

    /// Publishing or settling a message failed.
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Convenience type alias for reservation results.
pub type Result<T> = std::result::Result<T, ReservationError>;
