use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{InventoryError, InventoryStore, Money, ProductId, Result, Sku, Variant};

/// PostgreSQL-backed inventory store.
///
/// Reservation is a single conditional `UPDATE`, so correctness holds across
/// any number of worker processes sharing the database.
#[derive(Clone)]
pub struct PostgresInventoryStore {
    pool: PgPool,
}

impl PostgresInventoryStore {
    /// Creates a new PostgreSQL inventory store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Inserts or replaces a variant.
    pub async fn upsert_variant(&self, variant: &Variant) -> Result<()> {
        let stock = i32::try_from(variant.stock).map_err(|_| InventoryError::CorruptRow {
            product_id: variant.product_id.clone(),
            sku: variant.sku.clone(),
            reason: format!("stock {} exceeds column range", variant.stock),
        })?;

        sqlx::query(
            r#"
            INSERT INTO product_variants (product_id, sku, price_cents, sale_percentage, stock)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (product_id, sku) DO UPDATE SET
                price_cents = EXCLUDED.price_cents,
                sale_percentage = EXCLUDED.sale_percentage,
                stock = EXCLUDED.stock,
                updated_at = NOW()
            "#,
        )
        .bind(variant.product_id.as_str())
        .bind(variant.sku.as_str())
        .bind(variant.price.cents())
        .bind(i32::from(variant.sale_percentage))
        .bind(stock)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_variant(row: PgRow) -> Result<Variant> {
        let product_id = ProductId::new(row.try_get::<String, _>("product_id")?);
        let sku = Sku::new(row.try_get::<String, _>("sku")?);
        let sale: i32 = row.try_get("sale_percentage")?;
        let stock: i32 = row.try_get("stock")?;

        let corrupt = |reason: String| InventoryError::CorruptRow {
            product_id: product_id.clone(),
            sku: sku.clone(),
            reason,
        };
        let sale_percentage = u8::try_from(sale)
            .ok()
            .filter(|s| *s <= 100)
            .ok_or_else(|| corrupt(format!("sale percentage {sale} out of range")))?;
        let stock = u32::try_from(stock).map_err(|_| corrupt(format!("negative stock {stock}")))?;

        Ok(Variant {
            price: Money::from_cents(row.try_get("price_cents")?),
            product_id,
            sku,
            sale_percentage,
            stock,
        })
    }

    async fn current_stock(&self, product_id: &ProductId, sku: &Sku) -> Result<Option<u32>> {
        let stock: Option<i32> = sqlx::query_scalar(
            "SELECT stock FROM product_variants WHERE product_id = $1 AND sku = $2",
        )
        .bind(product_id.as_str())
        .bind(sku.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(stock.map(|s| u32::try_from(s).unwrap_or(0)))
    }
}

fn quantity_param(quantity: u32) -> Result<i32> {
    if quantity == 0 {
        return Err(InventoryError::InvalidQuantity(quantity));
    }
    i32::try_from(quantity).map_err(|_| InventoryError::InvalidQuantity(quantity))
}

#[async_trait]
impl InventoryStore for PostgresInventoryStore {
    #[tracing::instrument(skip(self))]
    async fn get_variant(&self, product_id: &ProductId, sku: &Sku) -> Result<Variant> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT product_id, sku, price_cents, sale_percentage, stock
            FROM product_variants
            WHERE product_id = $1 AND sku = $2
            "#,
        )
        .bind(product_id.as_str())
        .bind(sku.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_variant(row),
            None => Err(InventoryError::VariantNotFound {
                product_id: product_id.clone(),
                sku: sku.clone(),
            }),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn reserve_stock(
        &self,
        product_id: &ProductId,
        sku: &Sku,
        quantity: u32,
    ) -> Result<()> {
        let amount = quantity_param(quantity)?;

        let result = sqlx::query(
            r#"
            UPDATE product_variants
            SET stock = stock - $3, updated_at = NOW()
            WHERE product_id = $1 AND sku = $2 AND stock >= $3
            "#,
        )
        .bind(product_id.as_str())
        .bind(sku.as_str())
        .bind(amount)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        // The conditional update matched nothing: tell a missing SKU apart
        // from a short one.
        match self.current_stock(product_id, sku).await? {
            Some(available) => Err(InventoryError::InsufficientStock {
                product_id: product_id.clone(),
                sku: sku.clone(),
                requested: quantity,
                available,
            }),
            None => Err(InventoryError::VariantNotFound {
                product_id: product_id.clone(),
                sku: sku.clone(),
            }),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn release_stock(
        &self,
        product_id: &ProductId,
        sku: &Sku,
        quantity: u32,
    ) -> Result<()> {
        let amount = quantity_param(quantity)?;

        let result = sqlx::query(
            r#"
            UPDATE product_variants
            SET stock = stock + $3, updated_at = NOW()
            WHERE product_id = $1 AND sku = $2
            "#,
        )
        .bind(product_id.as_str())
        .bind(sku.as_str())
        .bind(amount)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(InventoryError::VariantNotFound {
                product_id: product_id.clone(),
                sku: sku.clone(),
            });
        }

        Ok(())
    }
}
