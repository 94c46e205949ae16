//! Persistence for credentials, shops, orders and webhook registrations.
//!
//! # Tables
//!
//! - `shopify_stores` - OAuth credentials, unique on `shop_domain`
//! - `shops` - Dashboard shops, unique on `(user_id, shop_domain)`
//! - `orders` - Ingested orders, unique on `(shop_id, shopify_order_id)`
//! - `webhook_registrations` - Provider subscription state per shop
//!
//! # Implementations
//!
//! - [`PgStore`] - `PostgreSQL` via `sqlx` (production)
//! - [`InMemoryStore`] - `tokio::sync::RwLock` maps (tests)
//!
//! # Migrations
//!
//! Migrations are stored in `crates/ingest/migrations/` and run via:
//! ```bash
//! cargo run -p callpilot-cli -- migrate
//! ```

pub mod memory;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use callpilot_core::{ShopDomain, UserId};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use crate::models::{
    ConnectedShop, InsertOutcome, NewOrder, ShopConnection, ShopCredential, WebhookRegistration,
};

pub use memory::InMemoryStore;
pub use postgres::PgStore;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// The store refused the write (used by the in-memory store's fault injection).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// Data access used by the HTTP handlers and the registration worker.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Store: Send + Sync {
    /// Check that the backing store answers.
    async fn ping(&self) -> Result<(), RepositoryError>;

    /// Persist a freshly authorized shop.
    ///
    /// Atomically upserts the credential (keyed on `shop_domain`), upserts the
    /// dashboard shop (keyed on `(user_id, shop_domain)`) as active, and
    /// deactivates the tenant's other shops. Either everything is written or
    /// nothing is.
    async fn connect_shop(
        &self,
        connection: &ShopConnection,
    ) -> Result<ConnectedShop, RepositoryError>;

    /// Look up the credential for a shop.
    async fn find_credential(
        &self,
        shop_domain: &ShopDomain,
    ) -> Result<Option<ShopCredential>, RepositoryError>;

    /// Look up a tenant's dashboard shop by domain.
    ///
    /// `None` matches shops that were connected without a tenant.
    async fn find_shop(
        &self,
        user_id: Option<&UserId>,
        shop_domain: &ShopDomain,
    ) -> Result<Option<ConnectedShop>, RepositoryError>;

    /// Insert an order unless `(shop_id, shopify_order_id)` already exists.
    async fn insert_order(&self, order: &NewOrder) -> Result<InsertOutcome, RepositoryError>;

    /// Create or replace the registration row for `registration.shop_domain`.
    async fn save_registration(
        &self,
        registration: &WebhookRegistration,
    ) -> Result<(), RepositoryError>;

    /// Registrations that are not registered, have attempts left and are due at `now`.
    ///
    /// Ordered by `next_attempt_at`, oldest first.
    async fn due_registrations(
        &self,
        now: DateTime<Utc>,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<WebhookRegistration>, RepositoryError>;

    /// Look up the registration row for a shop.
    async fn find_registration(
        &self,
        shop_domain: &ShopDomain,
    ) -> Result<Option<WebhookRegistration>, RepositoryError>;

    /// All registration rows, ordered by shop domain.
    async fn list_registrations(&self) -> Result<Vec<WebhookRegistration>, RepositoryError>;

    /// Remove the registration row for a shop.
    async fn delete_registration(&self, shop_domain: &ShopDomain) -> Result<(), RepositoryError>;
}
