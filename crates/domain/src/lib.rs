//! Domain layer for the order reservation pipeline.
//!
//! This crate provides:
//! - The order model: requests, resolved line items, persisted orders
//! - The order status state machine
//! - The `OrderStore` trait with in-memory and PostgreSQL implementations

pub mod error;
pub mod order;
pub mod store;

pub use common::{Money, OrderId, OwnerId, ProductId, Sku};
pub use error::DomainError;
pub use order::{
    LineItem, LineItemRequest, NewOrder, Order, OrderError, OrderRequest, OrderStatus,
    PaymentMethod, ShippingAddress, ValidatedRequest,
};
pub use store::{AttemptClaim, InMemoryOrderStore, OrderStore, PostgresOrderStore};
