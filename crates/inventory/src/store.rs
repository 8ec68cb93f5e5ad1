use async_trait::async_trait;

use crate::{Money, ProductId, Result, Sku};

/// A purchasable variant of a product, the unit at which stock is tracked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    /// The product this variant belongs to.
    pub product_id: ProductId,
    /// The variant's SKU, unique within the product.
    pub sku: Sku,
    /// Listed unit price.
    pub price: Money,
    /// Sale percentage in `0..=100`; 0 means no sale.
    pub sale_percentage: u8,
    /// Units currently available.
    pub stock: u32,
}

impl Variant {
    /// Creates a variant with no sale.
    pub fn new(
        product_id: impl Into<ProductId>,
        sku: impl Into<Sku>,
        price: Money,
        stock: u32,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            sku: sku.into(),
            price,
            sale_percentage: 0,
            stock,
        }
    }

    /// Sets the sale percentage.
    pub fn with_sale(mut self, sale_percentage: u8) -> Self {
        self.sale_percentage = sale_percentage;
        self
    }

    /// Returns the unit price after applying the sale percentage.
    pub fn effective_price(&self) -> Money {
        if self.sale_percentage > 0 {
            self.price.discounted(self.sale_percentage)
        } else {
            self.price
        }
    }
}

/// Core trait for inventory store implementations.
///
/// Implementations must make [`reserve_stock`](Self::reserve_stock) a single
/// atomic conditional operation: across every process sharing the store, the
/// sum of successful reservations on a SKU can never exceed its stock.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Looks up a variant by product and SKU.
    ///
    /// Fails with `VariantNotFound` if the SKU does not exist under the product.
    async fn get_variant(&self, product_id: &ProductId, sku: &Sku) -> Result<Variant>;

    /// Decrements stock by `quantity` only if at least `quantity` is available.
    ///
    /// On `InsufficientStock` nothing is decremented.
    async fn reserve_stock(&self, product_id: &ProductId, sku: &Sku, quantity: u32)
    -> Result<()>;

    /// Returns `quantity` units to stock.
    async fn release_stock(&self, product_id: &ProductId, sku: &Sku, quantity: u32)
    -> Result<()>;
}

#[async_trait]
impl<T: InventoryStore + ?Sized> InventoryStore for std::sync::Arc<T> {
    async fn get_variant(&self, product_id: &ProductId, sku: &Sku) -> Result<Variant> {
        (**self).get_variant(product_id, sku).await
    }

    async fn reserve_stock(
        &self,
        product_id: &ProductId,
        sku: &Sku,
        quantity: u32,
    ) -> Result<()> {
        (**self).reserve_stock(product_id, sku, quantity).await
    }

    async fn release_stock(
        &self,
        product_id: &ProductId,
        sku: &Sku,
        quantity: u32,
    ) -> Result<()> {
        (**self).release_stock(product_id, sku, quantity).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_price_without_sale_is_listed_price() {
        let variant = Variant::new("p1", "s1", Money::from_dollars(100), 5);
        assert_eq!(variant.effective_price(), Money::from_dollars(100));
    }

    #[test]
    fn effective_price_applies_sale() {
        let variant = Variant::new("p1", "s1", Money::from_dollars(100), 5).with_sale(10);
        assert_eq!(variant.effective_price(), Money::from_dollars(90));
    }
}
