use std::time::Duration;

use async_trait::async_trait;
use common::OrderId;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AckHandle, DeadLetter, Delivery, DeliveryStream, ReservationChannel, ReservationMessage,
    Result,
};

/// Polling and redelivery settings for [`PostgresChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostgresChannelOptions {
    /// How long an idle consumer waits before polling again.
    pub poll_interval: Duration,
    /// How long a claimed message stays invisible before it is redelivered.
    pub visibility_timeout: Duration,
}

impl Default for PostgresChannelOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            visibility_timeout: Duration::from_secs(60),
        }
    }
}

/// PostgreSQL-backed reservation channel.
///
/// Messages live in `reservation_queue`. A consumer claims a row by setting
/// `locked_until`; if it neither acks nor rejects before then, the row is
/// claimed again by the next poll. Consumers in different processes never
/// claim the same row at once (`FOR UPDATE SKIP LOCKED`).
#[derive(Clone)]
pub struct PostgresChannel {
    pool: PgPool,
    options: PostgresChannelOptions,
}

impl PostgresChannel {
    /// Creates a channel with default options.
    pub fn new(pool: PgPool) -> Self {
        Self::with_options(pool, PostgresChannelOptions::default())
    }

    /// Creates a channel with custom polling and visibility settings.
    pub fn with_options(pool: PgPool, options: PostgresChannelOptions) -> Self {
        Self { pool, options }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Enqueues a raw payload without encoding it.
    pub async fn publish_raw(
        &self,
        order_id: Option<OrderId>,
        payload: serde_json::Value,
    ) -> Result<()> {
        self.enqueue(order_id, payload, Duration::ZERO).await
    }

    /// Number of messages in the queue, claimed or not.
    pub async fn queued_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reservation_queue")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn enqueue(
        &self,
        order_id: Option<OrderId>,
        payload: serde_json::Value,
        delay: Duration,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO reservation_queue (order_id, payload, available_at)
            VALUES ($1, $2, NOW() + make_interval(secs => $3))
            "#,
        )
        .bind(order_id.map(|id| id.as_uuid()))
        .bind(payload)
        .bind(delay.as_secs_f64())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn claim_next(&self) -> Result<Option<Delivery>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            UPDATE reservation_queue
            SET locked_until = NOW() + make_interval(secs => $1),
                delivery_count = delivery_count + 1
            WHERE id = (
                SELECT id
                FROM reservation_queue
                WHERE available_at <= NOW()
                  AND (locked_until IS NULL OR locked_until <= NOW())
                ORDER BY available_at, id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, payload, delivery_count
            "#,
        )
        .bind(self.options.visibility_timeout.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id: i64 = row.try_get("id")?;
        let delivery_count: i32 = row.try_get("delivery_count")?;
        let handle = PostgresAck {
            pool: self.pool.clone(),
            id,
            delivery_count,
        };

        Ok(Some(Delivery::new(
            row.try_get("payload")?,
            u32::try_from(delivery_count).unwrap_or(0),
            Box::new(handle),
        )))
    }
}

#[async_trait]
impl ReservationChannel for PostgresChannel {
    #[tracing::instrument(skip(self, message), fields(order_id = %message.order_id, retry_count = message.retry_count))]
    async fn publish_delayed(&self, message: &ReservationMessage, delay: Duration) -> Result<()> {
        let payload = message.encode()?;
        self.enqueue(Some(message.order_id), payload, delay).await
    }

    async fn consume(&self) -> Result<DeliveryStream> {
        let stream = futures_util::stream::unfold(self.clone(), |channel| async move {
            loop {
                match channel.claim_next().await {
                    Ok(Some(delivery)) => return Some((Ok(delivery), channel)),
                    Ok(None) => tokio::time::sleep(channel.options.poll_interval).await,
                    Err(e) => {
                        tokio::time::sleep(channel.options.poll_interval).await;
                        return Some((Err(e), channel));
                    }
                }
            }
        });
        Ok(Box::pin(stream))
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        let rows: Vec<PgRow> = sqlx::query(
            r#"
            SELECT order_id, payload, reason, dead_lettered_at
            FROM reservation_dead_letters
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(DeadLetter {
                    order_id: row
                        .try_get::<Option<Uuid>, _>("order_id")?
                        .map(OrderId::from_uuid),
                    payload: row.try_get("payload")?,
                    reason: row.try_get("reason")?,
                    dead_lettered_at: row.try_get("dead_lettered_at")?,
                })
            })
            .collect()
    }
}

/// Settles one claimed row.
///
/// Every statement is conditional on the claim's `delivery_count`, so a
/// consumer whose claim expired cannot settle a row another consumer now
/// holds.
struct PostgresAck {
    pool: PgPool,
    id: i64,
    delivery_count: i32,
}

impl PostgresAck {
    fn warn_if_stale(&self, rows_affected: u64, action: &str) {
        if rows_affected == 0 {
            tracing::warn!(
                queue_id = self.id,
                delivery_count = self.delivery_count,
                action,
                "Claim expired before settlement; message was redelivered"
            );
        }
    }
}

#[async_trait]
impl AckHandle for PostgresAck {
    async fn ack(self: Box<Self>) -> Result<()> {
        let result =
            sqlx::query("DELETE FROM reservation_queue WHERE id = $1 AND delivery_count = $2")
                .bind(self.id)
                .bind(self.delivery_count)
                .execute(&self.pool)
                .await?;

        self.warn_if_stale(result.rows_affected(), "ack");
        Ok(())
    }

    async fn nack(self: Box<Self>, requeue_delay: Duration) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE reservation_queue
            SET locked_until = NULL,
                available_at = NOW() + make_interval(secs => $3)
            WHERE id = $1 AND delivery_count = $2
            "#,
        )
        .bind(self.id)
        .bind(self.delivery_count)
        .bind(requeue_delay.as_secs_f64())
        .execute(&self.pool)
        .await?;

        self.warn_if_stale(result.rows_affected(), "nack");
        Ok(())
    }

    async fn reject(self: Box<Self>, reason: String) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let row: Option<PgRow> = sqlx::query(
            r#"
            DELETE FROM reservation_queue
            WHERE id = $1 AND delivery_count = $2
            RETURNING order_id, payload
            "#,
        )
        .bind(self.id)
        .bind(self.delivery_count)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            self.warn_if_stale(0, "reject");
            return Ok(());
        };

        let order_id: Option<Uuid> = row.try_get("order_id")?;
        let payload: serde_json::Value = row.try_get("payload")?;
        sqlx::query(
            r#"
            INSERT INTO reservation_dead_letters (order_id, payload, reason)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(order_id)
        .bind(payload)
        .bind(&reason)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
