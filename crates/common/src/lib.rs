//! Shared types for the order reservation pipeline.

pub mod money;
pub mod types;

pub use money::Money;
pub use types::{OrderId, OwnerId, ProductId, Sku};
