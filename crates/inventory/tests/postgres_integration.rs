//! PostgreSQL integration tests for the inventory store.
//!
//! These tests start a PostgreSQL container and need a Docker daemon.
//! Run with:
//!
//! ```bash
//! cargo test -p inventory --test postgres_integration -- --ignored --test-threads=1
//! ```

use std::sync::Arc;

use inventory::{
    InventoryError, InventoryStore, LockingInventoryStore, Money, PostgresInventoryStore,
    ProductId, Sku, Variant,
};
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
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
                "../../../migrations/001_create_product_variants.sql"
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

async fn get_test_store() -> PostgresInventoryStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE product_variants")
        .execute(&pool)
        .await
        .unwrap();

    PostgresInventoryStore::new(pool)
}

fn ids() -> (ProductId, Sku) {
    (ProductId::new("prod-1"), Sku::new("sku-m"))
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn get_variant_returns_seeded_row() {
    let store = get_test_store().await;
    let (p, s) = ids();
    store
        .upsert_variant(&Variant::new(p.clone(), s.clone(), Money::from_dollars(100), 5).with_sale(10))
        .await
        .unwrap();

    let variant = store.get_variant(&p, &s).await.unwrap();
    assert_eq!(variant.stock, 5);
    assert_eq!(variant.sale_percentage, 10);
    assert_eq!(variant.effective_price(), Money::from_dollars(90));
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn missing_variant_is_not_found() {
    let store = get_test_store().await;
    let (p, s) = ids();

    assert!(matches!(
        store.get_variant(&p, &s).await,
        Err(InventoryError::VariantNotFound { .. })
    ));
    assert!(matches!(
        store.reserve_stock(&p, &s, 1).await,
        Err(InventoryError::VariantNotFound { .. })
    ));
    assert!(matches!(
        store.release_stock(&p, &s, 1).await,
        Err(InventoryError::VariantNotFound { .. })
    ));
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn reserve_is_conditional() {
    let store = get_test_store().await;
    let (p, s) = ids();
    store
        .upsert_variant(&Variant::new(p.clone(), s.clone(), Money::from_cents(100), 2))
        .await
        .unwrap();

    let err = store.reserve_stock(&p, &s, 3).await.unwrap_err();
    assert!(matches!(
        err,
        InventoryError::InsufficientStock {
            requested: 3,
            available: 2,
            ..
        }
    ));

    store.reserve_stock(&p, &s, 2).await.unwrap();
    store.release_stock(&p, &s, 1).await.unwrap();
    assert_eq!(store.get_variant(&p, &s).await.unwrap().stock, 1);
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn concurrent_reservations_across_pools_never_oversell() {
    let (p, s) = ids();
    let seed = get_test_store().await;
    seed.upsert_variant(&Variant::new(p.clone(), s.clone(), Money::from_cents(100), 7))
        .await
        .unwrap();

    // Separate pools stand in for separate worker processes.
    let info = get_container_info().await;
    let mut handles = Vec::new();
    for _ in 0..4 {
        let pool = PgPool::connect(&info.connection_string).await.unwrap();
        let store = LockingInventoryStore::new(PostgresInventoryStore::new(pool));
        let (p, s) = (p.clone(), s.clone());
        handles.push(tokio::spawn(async move {
            let mut ok = 0u32;
            for _ in 0..5 {
                if store.reserve_stock(&p, &s, 1).await.is_ok() {
                    ok += 1;
                }
            }
            ok
        }));
    }

    let mut total = 0;
    for handle in handles {
        total += handle.await.unwrap();
    }

    assert_eq!(total, 7);
    assert_eq!(seed.get_variant(&p, &s).await.unwrap().stock, 0);
}
