//! Inventory store for the order reservation pipeline.
//!
//! The store owns per-SKU stock, price and sale percentage. Stock is only ever
//! changed through [`InventoryStore::reserve_stock`] (an atomic
//! decrement-if-sufficient) and [`InventoryStore::release_stock`].

pub mod error;
pub mod lock;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::{Money, ProductId, Sku};
pub use error::{InventoryError, Result};
pub use lock::{LockingInventoryStore, ProductLocks};
pub use memory::InMemoryInventoryStore;
pub use postgres::PostgresInventoryStore;
pub use store::{InventoryStore, Variant};
