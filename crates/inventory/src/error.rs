use thiserror::Error;

use crate::{ProductId, Sku};

/// Errors that can occur when interacting with the inventory store.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// No variant with this SKU exists under the product.
    #[error("Variant not found: product {product_id}, sku {sku}")]
    VariantNotFound { product_id: ProductId, sku: Sku },

    /// The conditional decrement was refused; stock is unchanged.
    #[error(
        "Insufficient stock for product {product_id}, sku {sku}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: ProductId,
        sku: Sku,
        requested: u32,
        available: u32,
    },

    /// Quantity must be greater than zero.
    #[error("Invalid quantity: {0} (must be greater than 0)")]
    InvalidQuantity(u32),

    /// A stored row could not be mapped onto a variant.
    #[error("Corrupt variant row for product {product_id}, sku {sku}: {reason}")]
    CorruptRow {
        product_id: ProductId,
        sku: Sku,
        reason: String,
    },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The store is temporarily unavailable.
    #[error("Inventory store unavailable: {0}")]
    Unavailable(String),
}

impl InventoryError {
    /// Returns true if the failure is caused by stock levels rather than
    /// infrastructure.
    pub fn is_insufficient_stock(&self) -> bool {
        matches!(self, InventoryError::InsufficientStock { .. })
    }
}

/// Result type for inventory operations.
pub type Result<T> = std::result::Result<T, InventoryError>;
