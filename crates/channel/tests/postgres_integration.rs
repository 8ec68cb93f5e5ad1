//! PostgreSQL integration tests for the reservation channel.
//!
//! These tests start a PostgreSQL container and need a Docker daemon.
//! Run with:
//!
//! ```bash
//! cargo test -p channel --test postgres_integration -- --ignored --test-threads=1
//! ```

use std::sync::Arc;
use std::time::Duration;

use channel::{PostgresChannel, PostgresChannelOptions, ReservationChannel, ReservationMessage};
use chrono::Utc;
use common::{Money, OrderId};
use domain::{LineItem, LineItemRequest};
use futures_util::StreamExt;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/003_create_reservation_queue.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_channel(visibility_timeout: Duration) -> PostgresChannel {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE reservation_queue, reservation_dead_letters")
        .execute(&pool)
        .await
        .unwrap();

    PostgresChannel::with_options(
        pool,
        PostgresChannelOptions {
            poll_interval: Duration::from_millis(20),
            visibility_timeout,
        },
    )
}

fn message() -> ReservationMessage {
    ReservationMessage::new(
        OrderId::new(),
        vec![LineItem::resolve(
            LineItemRequest::new("prod-1", "sku-1", 2),
            Money::from_cents(1500),
            0,
        )],
        Utc::now(),
    )
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_publish_consume_ack() {
    let channel = get_test_channel(Duration::from_secs(30)).await;
    let msg = message();
    channel.publish(&msg).await.unwrap();

    let mut stream = channel.consume().await.unwrap();
    let delivery = stream.next().await.unwrap().unwrap();
    assert_eq!(delivery.message().unwrap(), msg);
    assert_eq!(delivery.delivery_count(), 1);

    delivery.ack().await.unwrap();
    assert_eq!(channel.queued_count().await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_unsettled_claim_is_redelivered_after_timeout() {
    let channel = get_test_channel(Duration::from_millis(200)).await;
    let msg = message();
    channel.publish(&msg).await.unwrap();

    let mut stream = channel.consume().await.unwrap();
    let first = stream.next().await.unwrap().unwrap();
    // Simulates a crashed worker.
    drop(first);

    let second = stream.next().await.unwrap().unwrap();
    assert_eq!(second.message().unwrap(), msg);
    assert_eq!(second.delivery_count(), 2);
    second.ack().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_nack_honors_delay() {
    let channel = get_test_channel(Duration::from_secs(30)).await;
    channel.publish(&message()).await.unwrap();

    let mut stream = channel.consume().await.unwrap();
    let first = stream.next().await.unwrap().unwrap();
    let nacked_at = std::time::Instant::now();
    first.nack(Duration::from_millis(300)).await.unwrap();

    let second = stream.next().await.unwrap().unwrap();
    assert!(nacked_at.elapsed() >= Duration::from_millis(250));
    assert_eq!(second.delivery_count(), 2);
    second.ack().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_reject_moves_to_dead_letters() {
    let channel = get_test_channel(Duration::from_secs(30)).await;
    let msg = message();
    channel.publish(&msg).await.unwrap();
    channel
        .publish_raw(None, serde_json::json!({"schema": "v0"}))
        .await
        .unwrap();

    let mut stream = channel.consume().await.unwrap();
    for _ in 0..2 {
        let delivery = stream.next().await.unwrap().unwrap();
        let reason = match delivery.message() {
            Ok(_) => "retries exhausted".to_string(),
            Err(e) => e.to_string(),
        };
        delivery.reject(reason).await.unwrap();
    }

    assert_eq!(channel.queued_count().await.unwrap(), 0);
    let dead = channel.dead_letters().await.unwrap();
    assert_eq!(dead.len(), 2);
    assert_eq!(dead[0].order_id, Some(msg.order_id));
    assert_eq!(dead[0].reason, "retries exhausted");
    assert_eq!(dead[1].order_id, None);
    assert!(dead[1].reason.contains("v0"));
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_competing_consumers_split_messages() {
    let channel = get_test_channel(Duration::from_secs(30)).await;
    for _ in 0..20 {
        channel.publish(&message()).await.unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let channel = channel.clone();
        handles.push(tokio::spawn(async move {
            let mut stream = channel.consume().await.unwrap();
            let mut seen = Vec::new();
            while let Ok(Some(delivery)) =
                tokio::time::timeout(Duration::from_millis(500), stream.next()).await
            {
                let delivery = delivery.unwrap();
                seen.push(delivery.message().unwrap().order_id);
                delivery.ack().await.unwrap();
            }
            seen
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    let total = all.len();
    all.sort_by_key(|id| id.as_uuid());
    all.dedup();
    assert_eq!(total, 20);
    assert_eq!(all.len(), 20);
}
