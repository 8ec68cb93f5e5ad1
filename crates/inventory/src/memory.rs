use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{InventoryError, InventoryStore, ProductId, Result, Sku, Variant};

#[derive(Debug, Default)]
struct InMemoryInventoryState {
    variants: HashMap<(ProductId, Sku), Variant>,
    failing_reserves: u32,
    failing_releases: u32,
    reserve_calls: u64,
    release_calls: u64,
}

/// In-memory inventory store for testing and single-process use.
///
/// The check and the decrement in [`reserve_stock`](InventoryStore::reserve_stock)
/// happen under one write lock, so the conditional decrement is atomic for
/// every clone of the store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryStore {
    state: Arc<RwLock<InMemoryInventoryState>>,
}

impl InMemoryInventoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with the given variants.
    pub async fn with_variants(variants: impl IntoIterator<Item = Variant>) -> Self {
        let store = Self::new();
        for variant in variants {
            store.upsert_variant(variant).await;
        }
        store
    }

    /// Inserts or replaces a variant.
    pub async fn upsert_variant(&self, variant: Variant) {
        let key = (variant.product_id.clone(), variant.sku.clone());
        self.state.write().await.variants.insert(key, variant);
    }

    /// Returns the current stock of a SKU, if it exists.
    pub async fn stock_of(&self, product_id: &ProductId, sku: &Sku) -> Option<u32> {
        self.state
            .read()
            .await
            .variants
            .get(&(product_id.clone(), sku.clone()))
            .map(|v| v.stock)
    }

    /// Makes the next `count` reserve calls fail with `Unavailable`, as a
    /// transient infrastructure failure would.
    pub async fn fail_next_reserves(&self, count: u32) {
        self.state.write().await.failing_reserves = count;
    }

    /// Makes the next `count` release calls fail with `Unavailable`.
    pub async fn fail_next_releases(&self, count: u32) {
        self.state.write().await.failing_releases = count;
    }

    /// Returns how many reserve calls reached the store.
    pub async fn reserve_calls(&self) -> u64 {
        self.state.read().await.reserve_calls
    }

    /// Returns how many release calls reached the store.
    pub async fn release_calls(&self) -> u64 {
        self.state.read().await.release_calls
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn get_variant(&self, product_id: &ProductId, sku: &Sku) -> Result<Variant> {
        self.state
            .read()
            .await
            .variants
            .get(&(product_id.clone(), sku.clone()))
            .cloned()
            .ok_or_else(|| InventoryError::VariantNotFound {
                product_id: product_id.clone(),
                sku: sku.clone(),
            })
    }

    async fn reserve_stock(
        &self,
        product_id: &ProductId,
        sku: &Sku,
        quantity: u32,
    ) -> Result<()> {
        if quantity == 0 {
            return Err(InventoryError::InvalidQuantity(quantity));
        }

        let mut state = self.state.write().await;
        state.reserve_calls += 1;

        if state.failing_reserves > 0 {
            state.failing_reserves -= 1;
            return Err(InventoryError::Unavailable(
                "injected reserve failure".to_string(),
            ));
        }

        let variant = state
            .variants
            .get_mut(&(product_id.clone(), sku.clone()))
            .ok_or_else(|| InventoryError::VariantNotFound {
                product_id: product_id.clone(),
                sku: sku.clone(),
            })?;

        if variant.stock < quantity {
            return Err(InventoryError::InsufficientStock {
                product_id: product_id.clone(),
                sku: sku.clone(),
                requested: quantity,
                available: variant.stock,
            });
        }

        variant.stock -= quantity;
        Ok(())
    }

    async fn release_stock(
        &self,
        product_id: &ProductId,
        sku: &Sku,
        quantity: u32,
    ) -> Result<()> {
        if quantity == 0 {
            return Err(InventoryError::InvalidQuantity(quantity));
        }

        let mut state = self.state.write().await;
        state.release_calls += 1;

        if state.failing_releases > 0 {
            state.failing_releases -= 1;
            return Err(InventoryError::Unavailable(
                "injected release failure".to_string(),
            ));
        }

        let variant = state
            .variants
            .get_mut(&(product_id.clone(), sku.clone()))
            .ok_or_else(|| InventoryError::VariantNotFound {
                product_id: product_id.clone(),
                sku: sku.clone(),
            })?;

        variant.stock = variant.stock.saturating_add(quantity);
        Ok(())
    }
}
