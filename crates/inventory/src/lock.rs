//! Per-product serialization inside one process.
//!
//! These locks only reduce contention on the conditional update when several
//! worker loops in the same process hit the same product. They protect
//! nothing across processes; the store's conditional decrement stays the
//! only correctness mechanism.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{InventoryStore, ProductId, Result, Sku, Variant};

/// Default number of lock shards.
pub const DEFAULT_SHARDS: usize = 64;

/// A fixed pool of async mutexes, one chosen per product by hashing its id.
///
/// Two products may share a shard; that only costs contention.
#[derive(Debug, Clone)]
pub struct ProductLocks {
    shards: Arc<[Arc<Mutex<()>>]>,
}

impl ProductLocks {
    /// Creates a pool with `shards` mutexes (at least one).
    pub fn new(shards: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| Arc::new(Mutex::new(())))
            .collect::<Vec<_>>();
        Self {
            shards: shards.into(),
        }
    }

    /// Returns the number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn shard_for(&self, product_id: &ProductId) -> usize {
        let mut hasher = DefaultHasher::new();
        product_id.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    /// Waits for the lock guarding `product_id`.
    pub async fn lock(&self, product_id: &ProductId) -> OwnedMutexGuard<()> {
        let shard = self.shard_for(product_id);
        self.shards[shard].clone().lock_owned().await
    }
}

impl Default for ProductLocks {
    fn default() -> Self {
        Self::new(DEFAULT_SHARDS)
    }
}

/// Inventory store decorator that serializes reserve/release per product.
#[derive(Debug, Clone)]
pub struct LockingInventoryStore<S> {
    inner: S,
    locks: ProductLocks,
}

impl<S: InventoryStore> LockingInventoryStore<S> {
    /// Wraps `inner` with the default shard count.
    pub fn new(inner: S) -> Self {
        Self::with_locks(inner, ProductLocks::default())
    }

    /// Wraps `inner` with an explicit lock pool.
    pub fn with_locks(inner: S, locks: ProductLocks) -> Self {
        Self { inner, locks }
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: InventoryStore> InventoryStore for LockingInventoryStore<S> {
    async fn get_variant(&self, product_id: &ProductId, sku: &Sku) -> Result<Variant> {
        self.inner.get_variant(product_id, sku).await
    }

    async fn reserve_stock(
        &self,
        product_id: &ProductId,
        sku: &Sku,
        quantity: u32,
    ) -> Result<()> {
        let _guard = self.locks.lock(product_id).await;
        self.inner.reserve_stock(product_id, sku, quantity).await
    }

    async fn release_stock(
        &self,
        product_id: &ProductId,
        sku: &Sku,
        quantity: u32,
    ) -> Result<()> {
        let _guard = self.locks.lock(product_id).await;
        self.inner.release_stock(product_id, sku, quantity).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryInventoryStore, Money};
    use std::time::Duration;

    #[test]
    fn test_shard_count_is_at_least_one() {
        assert_eq!(ProductLocks::new(0).shard_count(), 1);
        assert_eq!(ProductLocks::default().shard_count(), DEFAULT_SHARDS);
    }

    #[test]
    fn test_same_product_maps_to_same_shard() {
        let locks = ProductLocks::new(16);
        let id = ProductId::new("prod-42");
        assert_eq!(locks.shard_for(&id), locks.shard_for(&id.clone()));
    }

    #[tokio::test]
    async fn test_lock_excludes_second_holder() {
        let locks = ProductLocks::new(4);
        let id = ProductId::new("prod-1");

        let guard = locks.lock(&id).await;
        let second = tokio::time::timeout(Duration::from_millis(20), locks.lock(&id)).await;
        assert!(second.is_err());

        drop(guard);
        let third = tokio::time::timeout(Duration::from_millis(20), locks.lock(&id)).await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn test_decorator_delegates_reservations() {
        let inner = InMemoryInventoryStore::with_variants([Variant::new(
            "prod-1",
            "sku-1",
            Money::from_cents(500),
            3,
        )])
        .await;
        let store = LockingInventoryStore::new(inner.clone());
        let (p, s) = (ProductId::new("prod-1"), Sku::new("sku-1"));

        store.reserve_stock(&p, &s, 2).await.unwrap();
        assert!(store.reserve_stock(&p, &s, 2).await.is_err());
        store.release_stock(&p, &s, 2).await.unwrap();

        assert_eq!(inner.stock_of(&p, &s).await, Some(3));
        assert_eq!(store.get_variant(&p, &s).await.unwrap().stock, 3);
    }
}
