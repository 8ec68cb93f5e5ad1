use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Money, OrderId, OwnerId};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use super::{AttemptClaim, OrderStore};
use crate::error::DomainError;
use crate::order::{LineItem, NewOrder, Order, OrderStatus, PaymentMethod, ShippingAddress};

const ORDER_COLUMNS: &str = "id, owner_id, status, shipping_address, items, total_cents, \
                             payment_method, reservation_attempts, created_at";

/// PostgreSQL-backed order store.
///
/// Line items and the shipping address are stored as JSONB.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_order(row: PgRow) -> Result<Order, DomainError> {
        let id = OrderId::from_uuid(row.try_get::<Uuid, _>("id")?);
        let corrupt = |reason: String| DomainError::CorruptRow {
            order_id: id,
            reason,
        };

        let status: String = row.try_get("status")?;
        let status = status.parse::<OrderStatus>().map_err(corrupt)?;
        let attempts: i32 = row.try_get("reservation_attempts")?;
        let reservation_attempts = u32::try_from(attempts)
            .map_err(|_| corrupt(format!("negative reservation attempts {attempts}")))?;

        let shipping_address: ShippingAddress =
            serde_json::from_value(row.try_get("shipping_address")?)?;
        let items: Vec<LineItem> = serde_json::from_value(row.try_get("items")?)?;

        Ok(Order {
            id,
            owner_id: OwnerId::new(row.try_get::<String, _>("owner_id")?),
            status,
            shipping_address,
            items,
            total: Money::from_cents(row.try_get("total_cents")?),
            payment_method: PaymentMethod::new(row.try_get::<String, _>("payment_method")?),
            created_at: row.try_get("created_at")?,
            reservation_attempts,
        })
    }
}

fn attempts_param(retry_count: u32) -> i32 {
    i32::try_from(retry_count).unwrap_or(i32::MAX)
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    #[tracing::instrument(skip(self, order), fields(owner_id = %order.owner_id()))]
    async fn create_order(&self, order: NewOrder) -> Result<OrderId, DomainError> {
        let order_id = OrderId::new();
        let order = order.into_order(order_id);

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, owner_id, status, shipping_address, items, total_cents,
                payment_method, reservation_attempts, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $8)
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(order.owner_id.as_str())
        .bind(order.status.as_str())
        .bind(serde_json::to_value(&order.shipping_address)?)
        .bind(serde_json::to_value(&order.items)?)
        .bind(order.total.cents())
        .bind(order.payment_method.as_str())
        .bind(order.created_at)
        .execute(&self.pool)
        .await?;

        Ok(order_id)
    }

    #[tracing::instrument(skip(self))]
    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>, DomainError> {
        let row: Option<PgRow> =
            sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
                .bind(order_id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;

        row.map(Self::row_to_order).transpose()
    }

    #[tracing::instrument(skip(self))]
    async fn update_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<(), DomainError> {
        let allowed_from: Vec<String> = OrderStatus::predecessors_of(status)
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status = ANY($3)
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(status.as_str())
        .bind(&allowed_from)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM orders WHERE id = $1")
                .bind(order_id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;

        match current {
            Some(current) => Err(DomainError::InvalidStatusTransition {
                order_id,
                from: current.parse::<OrderStatus>().map_err(|reason| DomainError::CorruptRow {
                    order_id,
                    reason,
                })?,
                to: status,
            }),
            None => Err(DomainError::OrderNotFound(order_id)),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn claim_reservation_attempt(
        &self,
        order_id: OrderId,
        retry_count: u32,
    ) -> Result<AttemptClaim, DomainError> {
        let retry_count = attempts_param(retry_count);

        let claimed: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE orders
            SET status = 'processing',
                reservation_attempts = $2 + 1,
                updated_at = NOW()
            WHERE id = $1
              AND status IN ('pending', 'processing')
              AND reservation_attempts <= $2
            RETURNING reservation_attempts
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(retry_count)
        .fetch_optional(&self.pool)
        .await?;

        if claimed.is_some() {
            return Ok(AttemptClaim::Claimed);
        }

        let row: Option<PgRow> =
            sqlx::query("SELECT status, reservation_attempts FROM orders WHERE id = $1")
                .bind(order_id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;
        let row = row.ok_or(DomainError::OrderNotFound(order_id))?;

        let corrupt = |reason: String| DomainError::CorruptRow { order_id, reason };
        let status: String = row.try_get("status")?;
        let attempts: i32 = row.try_get("reservation_attempts")?;

        Ok(AttemptClaim::Duplicate {
            status: status.parse::<OrderStatus>().map_err(corrupt)?,
            attempts: u32::try_from(attempts)
                .map_err(|_| corrupt(format!("negative reservation attempts {attempts}")))?,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn release_reservation_attempt(
        &self,
        order_id: OrderId,
        retry_count: u32,
    ) -> Result<bool, DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET reservation_attempts = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'processing' AND reservation_attempts = $2 + 1
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(attempts_param(retry_count))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self))]
    async fn find_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>, DomainError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows: Vec<PgRow> = sqlx::query(&format!(
            r#"
            SELECT {ORDER_COLUMNS}
            FROM orders
            WHERE status = 'pending' AND reservation_attempts = 0 AND created_at < $1
            ORDER BY created_at ASC
            LIMIT $2
            "#
        ))
        .bind(created_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_order).collect()
    }
}
