//! Order model and related types.

mod model;
mod request;
mod status;
mod value_objects;

pub use model::{LineItem, NewOrder, Order};
pub use request::{LineItemRequest, OrderRequest, ValidatedRequest};
pub use status::OrderStatus;
pub use value_objects::{PaymentMethod, ShippingAddress};

use thiserror::Error;

/// Reasons an incoming order request is rejected before any store is touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// Owner reference is required.
    #[error("Owner ID is required")]
    OwnerRequired,

    /// Status placeholder is required.
    #[error("Status is required")]
    StatusRequired,

    /// Shipping address is required.
    #[error("Shipping address is required")]
    ShippingAddressRequired,

    /// A shipping address field is blank.
    #[error("Shipping address field '{field}' is required")]
    AddressFieldRequired { field: &'static str },

    /// Order has no items.
    #[error("Order has no items")]
    NoItems,

    /// A line item has no product reference.
    #[error("Item {index}: product ID is required")]
    ProductRequired { index: usize },

    /// A line item has no SKU reference.
    #[error("Item {index}: SKU is required")]
    SkuRequired { index: usize },

    /// Invalid quantity.
    #[error("Item {index}: invalid quantity {quantity} (must be greater than 0)")]
    InvalidQuantity { index: usize, quantity: u32 },

    /// A client-supplied sale percentage is outside 0..=100.
    #[error("Item {index}: invalid sale percentage {value} (must be 0 to 100)")]
    InvalidSalePercentage { index: usize, value: u8 },

    /// Payment method is required.
    #[error("Payment method is required")]
    PaymentMethodRequired,
}
