//! `PgStore` against a real database.
//!
//! These tests require a `PostgreSQL` database in `INGEST_TEST_DATABASE_URL`.
//! Migrations are applied on connect. Each test uses its own shop domain so
//! runs do not interfere.
//!
//! Run with: `cargo test -p callpilot-integration-tests -- --ignored`

#![allow(clippy::unwrap_used)]

use callpilot_core::{ShopDomain, UserId};
use callpilot_ingest::db::{PgStore, Store, create_pool};
use callpilot_ingest::models::{InsertOutcome, ShopConnection};
use callpilot_ingest::shopify::webhook::OrderPayload;
use callpilot_integration_tests::order_payload;
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};

async fn store() -> PgStore {
    let url = std::env::var("INGEST_TEST_DATABASE_URL")
        .expect("INGEST_TEST_DATABASE_URL must be set for PostgreSQL tests");
    let pool = create_pool(&SecretString::from(url)).await.unwrap();
    sqlx::migrate!("../ingest/migrations")
        .run(&pool)
        .await
        .unwrap();
    PgStore::new(pool)
}

fn unique_shop(prefix: &str) -> ShopDomain {
    let suffix = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    ShopDomain::parse(&format!("{prefix}-{suffix}.myshopify.com")).unwrap()
}

fn connection(user: Option<&str>, shop: &ShopDomain, token: &str) -> ShopConnection {
    ShopConnection {
        user_id: user.map(|u| UserId::parse(u).unwrap()),
        shop_domain: shop.clone(),
        access_token: SecretString::from(token),
        scope: "read_orders".to_string(),
    }
}

#[tokio::test]
#[ignore = "Requires INGEST_TEST_DATABASE_URL"]
async fn test_connect_shop_upserts() {
    let store = store().await;
    let shop = unique_shop("pg-upsert");
    let user = format!("user-{}", shop.handle());

    let first = store
        .connect_shop(&connection(Some(&user), &shop, "t1"))
        .await
        .unwrap();
    let second = store
        .connect_shop(&connection(Some(&user), &shop, "t2"))
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert!(second.is_active);
    assert_eq!(second.api_key.expose_secret(), "t2");

    let credential = store.find_credential(&shop).await.unwrap().unwrap();
    assert_eq!(credential.access_token.expose_secret(), "t2");
    assert_eq!(credential.user_id.as_ref().map(UserId::as_str), Some(user.as_str()));
}

#[tokio::test]
#[ignore = "Requires INGEST_TEST_DATABASE_URL"]
async fn test_connect_without_user_keeps_tenant() {
    let store = store().await;
    let shop = unique_shop("pg-tenant");
    let user = format!("user-{}", shop.handle());

    store
        .connect_shop(&connection(Some(&user), &shop, "t1"))
        .await
        .unwrap();
    let reconnected = store
        .connect_shop(&connection(None, &shop, "t2"))
        .await
        .unwrap();

    assert_eq!(
        reconnected.user_id.as_ref().map(UserId::as_str),
        Some(user.as_str())
    );
    let found = store
        .find_shop(reconnected.user_id.as_ref(), &shop)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, reconnected.id);
}

#[tokio::test]
#[ignore = "Requires INGEST_TEST_DATABASE_URL"]
async fn test_one_active_shop_per_user() {
    let store = store().await;
    let first_shop = unique_shop("pg-first");
    let second_shop = unique_shop("pg-second");
    let user = format!("user-{}", first_shop.handle());

    store
        .connect_shop(&connection(Some(&user), &first_shop, "t1"))
        .await
        .unwrap();
    store
        .connect_shop(&connection(Some(&user), &second_shop, "t2"))
        .await
        .unwrap();

    let user_id = UserId::parse(&user).unwrap();
    let first = store
        .find_shop(Some(&user_id), &first_shop)
        .await
        .unwrap()
        .unwrap();
    let second = store
        .find_shop(Some(&user_id), &second_shop)
        .await
        .unwrap()
        .unwrap();
    assert!(!first.is_active);
    assert!(second.is_active);
}

#[tokio::test]
#[ignore = "Requires INGEST_TEST_DATABASE_URL"]
async fn test_reinstall_under_new_tenant_deactivates_previous_owner() {
    let store = store().await;
    let shop = unique_shop("pg-owner");
    let first_user = format!("first-{}", shop.handle());
    let second_user = format!("second-{}", shop.handle());

    let first = store
        .connect_shop(&connection(Some(&first_user), &shop, "t1"))
        .await
        .unwrap();
    let second = store
        .connect_shop(&connection(Some(&second_user), &shop, "t2"))
        .await
        .unwrap();
    assert_ne!(first.id, second.id);
    assert!(second.is_active);

    let previous = store
        .find_shop(Some(&UserId::parse(&first_user).unwrap()), &shop)
        .await
        .unwrap()
        .unwrap();
    assert!(!previous.is_active);
}

#[tokio::test]
#[ignore = "Requires INGEST_TEST_DATABASE_URL"]
async fn test_insert_order_deduplicates() {
    let store = store().await;
    let shop = unique_shop("pg-orders");
    let connected = store
        .connect_shop(&connection(Some("pg-order-user"), &shop, "t1"))
        .await
        .unwrap();

    let order = OrderPayload::from_slice(order_payload(123).to_string().as_bytes())
        .unwrap()
        .into_new_order(connected.user_id.clone(), connected.id, "RON")
        .unwrap();

    let first = store.insert_order(&order).await.unwrap();
    let second = store.insert_order(&order).await.unwrap();

    assert!(matches!(first, InsertOutcome::Inserted(_)));
    assert_eq!(second, InsertOutcome::Duplicate);
}

#[tokio::test]
#[ignore = "Requires INGEST_TEST_DATABASE_URL"]
async fn test_ping() {
    store().await.ping().await.unwrap();
}
