//! `PostgreSQL` implementation of [`Store`].

use async_trait::async_trait;
use callpilot_core::{CredentialId, OrderId, ShopDomain, ShopId, UserId};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use sqlx::PgPool;

use super::{RepositoryError, Store};
use crate::models::{
    ConnectedShop, InsertOutcome, NewOrder, ShopConnection, ShopCredential, WebhookRegistration,
};

// =============================================================================
// Row types
// =============================================================================

/// Internal row type for `shopify_stores`.
#[derive(Debug, sqlx::FromRow)]
struct CredentialRow {
    id: i64,
    user_id: Option<String>,
    shop_domain: String,
    access_token: String,
    scope: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CredentialRow> for ShopCredential {
    type Error = RepositoryError;

    fn try_from(row: CredentialRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: CredentialId::new(row.id),
            user_id: parse_user_id(row.user_id)?,
            shop_domain: parse_domain(&row.shop_domain)?,
            access_token: SecretString::from(row.access_token),
            scope: row.scope,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Internal row type for `shops`.
#[derive(Debug, sqlx::FromRow)]
struct ShopRow {
    id: i64,
    user_id: Option<String>,
    name: String,
    platform: String,
    store_url: String,
    shop_domain: String,
    api_key: String,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ShopRow> for ConnectedShop {
    type Error = RepositoryError;

    fn try_from(row: ShopRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: ShopId::new(row.id),
            user_id: parse_user_id(row.user_id)?,
            name: row.name,
            platform: row.platform,
            store_url: row.store_url,
            shop_domain: parse_domain(&row.shop_domain)?,
            api_key: SecretString::from(row.api_key),
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Internal row type for `webhook_registrations`.
#[derive(Debug, sqlx::FromRow)]
struct RegistrationRow {
    shop_domain: String,
    topic: String,
    address: String,
    status: String,
    attempts: i32,
    last_error: Option<String>,
    provider_webhook_id: Option<i64>,
    next_attempt_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RegistrationRow> for WebhookRegistration {
    type Error = RepositoryError;

    fn try_from(row: RegistrationRow) -> Result<Self, Self::Error> {
        Ok(Self {
            shop_domain: parse_domain(&row.shop_domain)?,
            topic: row.topic,
            address: row.address,
            status: row.status.parse().map_err(RepositoryError::DataCorruption)?,
            attempts: row.attempts,
            last_error: row.last_error,
            provider_webhook_id: row.provider_webhook_id,
            next_attempt_at: row.next_attempt_at,
            updated_at: row.updated_at,
        })
    }
}

fn parse_domain(value: &str) -> Result<ShopDomain, RepositoryError> {
    ShopDomain::parse(value)
        .map_err(|e| RepositoryError::DataCorruption(format!("shop_domain '{value}': {e}")))
}

fn parse_user_id(value: Option<String>) -> Result<Option<UserId>, RepositoryError> {
    value
        .map(|v| {
            UserId::parse(&v)
                .map_err(|e| RepositoryError::DataCorruption(format!("user_id '{v}': {e}")))
        })
        .transpose()
}

const SHOP_COLUMNS: &str = "id, user_id, name, platform, store_url, shop_domain, api_key, \
                            is_active, created_at, updated_at";

const REGISTRATION_COLUMNS: &str = "shop_domain, topic, address, status, attempts, last_error, \
                                    provider_webhook_id, next_attempt_at, updated_at";

// =============================================================================
// Store
// =============================================================================

/// [`Store`] backed by a `PostgreSQL` pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Access the underlying pool (used for migrations).
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn connect_shop(
        &self,
        connection: &ShopConnection,
    ) -> Result<ConnectedShop, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // A callback without a tenant keeps the tenant a previous connection recorded.
        let credential: CredentialRow = sqlx::query_as(
            r"
            INSERT INTO shopify_stores (user_id, shop_domain, access_token, scope)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (shop_domain) DO UPDATE SET
                user_id = COALESCE(EXCLUDED.user_id, shopify_stores.user_id),
                access_token = EXCLUDED.access_token,
                scope = EXCLUDED.scope,
                updated_at = now()
            RETURNING id, user_id, shop_domain, access_token, scope, created_at, updated_at
            ",
        )
        .bind(connection.user_id.as_ref().map(UserId::as_str))
        .bind(connection.shop_domain.as_str())
        .bind(connection.access_token.expose_secret())
        .bind(&connection.scope)
        .fetch_one(&mut *tx)
        .await?;

        // A reinstall under another tenant retires the previous owner's shop.
        sqlx::query(
            r"
            UPDATE shops SET is_active = FALSE, updated_at = now()
            WHERE shop_domain = $1
              AND COALESCE(user_id, '') <> COALESCE($2, '')
              AND is_active
            ",
        )
        .bind(connection.shop_domain.as_str())
        .bind(credential.user_id.as_deref())
        .execute(&mut *tx)
        .await?;

        if let Some(user_id) = &credential.user_id {
            sqlx::query(
                r"
                UPDATE shops SET is_active = FALSE, updated_at = now()
                WHERE user_id = $1 AND shop_domain <> $2 AND is_active
                ",
            )
            .bind(user_id)
            .bind(connection.shop_domain.as_str())
            .execute(&mut *tx)
            .await?;
        }

        let shop: ShopRow = sqlx::query_as(&format!(
            r"
            INSERT INTO shops (user_id, name, platform, store_url, shop_domain, api_key, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, TRUE)
            ON CONFLICT ((COALESCE(user_id, '')), shop_domain) DO UPDATE SET
                name = EXCLUDED.name,
                store_url = EXCLUDED.store_url,
                api_key = EXCLUDED.api_key,
                is_active = TRUE,
                updated_at = now()
            RETURNING {SHOP_COLUMNS}
            "
        ))
        .bind(credential.user_id.as_deref())
        .bind(connection.shop_name())
        .bind(crate::models::SHOPIFY_PLATFORM)
        .bind(connection.store_url())
        .bind(connection.shop_domain.as_str())
        .bind(connection.access_token.expose_secret())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        ConnectedShop::try_from(shop)
    }

    async fn find_credential(
        &self,
        shop_domain: &ShopDomain,
    ) -> Result<Option<ShopCredential>, RepositoryError> {
        let row: Option<CredentialRow> = sqlx::query_as(
            r"
            SELECT id, user_id, shop_domain, access_token, scope, created_at, updated_at
            FROM shopify_stores
            WHERE shop_domain = $1
            ",
        )
        .bind(shop_domain.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ShopCredential::try_from).transpose()
    }

    async fn find_shop(
        &self,
        user_id: Option<&UserId>,
        shop_domain: &ShopDomain,
    ) -> Result<Option<ConnectedShop>, RepositoryError> {
        let row: Option<ShopRow> = sqlx::query_as(&format!(
            r"
            SELECT {SHOP_COLUMNS}
            FROM shops
            WHERE user_id IS NOT DISTINCT FROM $1 AND shop_domain = $2
            "
        ))
        .bind(user_id.map(UserId::as_str))
        .bind(shop_domain.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ConnectedShop::try_from).transpose()
    }

    async fn insert_order(&self, order: &NewOrder) -> Result<InsertOutcome, RepositoryError> {
        let id: Option<i64> = sqlx::query_scalar(
            r"
            INSERT INTO orders (
                user_id, shop_id, shopify_order_id, order_number, customer_name,
                customer_phone, customer_email, total_amount, currency, order_status,
                payment_status, shipping_status, payment_method, country_code,
                placed_at, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT ON CONSTRAINT orders_shop_shopify_order_key DO NOTHING
            RETURNING id
            ",
        )
        .bind(order.user_id.as_ref().map(UserId::as_str))
        .bind(order.shop_id)
        .bind(&order.shopify_order_id)
        .bind(&order.order_number)
        .bind(&order.customer_name)
        .bind(order.customer_phone.as_deref())
        .bind(order.customer_email.as_deref())
        .bind(order.total_amount)
        .bind(&order.currency)
        .bind(&order.order_status)
        .bind(&order.payment_status)
        .bind(&order.shipping_status)
        .bind(&order.payment_method)
        .bind(order.country_code.as_deref())
        .bind(order.placed_at)
        .bind(order.notes.as_deref())
        .fetch_optional(&self.pool)
        .await?;

        Ok(id.map_or(InsertOutcome::Duplicate, |id| {
            InsertOutcome::Inserted(OrderId::new(id))
        }))
    }

    async fn save_registration(
        &self,
        registration: &WebhookRegistration,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO webhook_registrations (
                shop_domain, topic, address, status, attempts, last_error,
                provider_webhook_id, next_attempt_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (shop_domain) DO UPDATE SET
                topic = EXCLUDED.topic,
                address = EXCLUDED.address,
                status = EXCLUDED.status,
                attempts = EXCLUDED.attempts,
                last_error = EXCLUDED.last_error,
                provider_webhook_id = EXCLUDED.provider_webhook_id,
                next_attempt_at = EXCLUDED.next_attempt_at,
                updated_at = EXCLUDED.updated_at
            ",
        )
        .bind(registration.shop_domain.as_str())
        .bind(&registration.topic)
        .bind(&registration.address)
        .bind(registration.status.as_str())
        .bind(registration.attempts)
        .bind(registration.last_error.as_deref())
        .bind(registration.provider_webhook_id)
        .bind(registration.next_attempt_at)
        .bind(registration.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn due_registrations(
        &self,
        now: DateTime<Utc>,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<WebhookRegistration>, RepositoryError> {
        let rows: Vec<RegistrationRow> = sqlx::query_as(&format!(
            r"
            SELECT {REGISTRATION_COLUMNS}
            FROM webhook_registrations
            WHERE status <> 'registered' AND attempts < $2 AND next_attempt_at <= $1
            ORDER BY next_attempt_at
            LIMIT $3
            "
        ))
        .bind(now)
        .bind(max_attempts)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(WebhookRegistration::try_from)
            .collect()
    }

    async fn find_registration(
        &self,
        shop_domain: &ShopDomain,
    ) -> Result<Option<WebhookRegistration>, RepositoryError> {
        let row: Option<RegistrationRow> = sqlx::query_as(&format!(
            "SELECT {REGISTRATION_COLUMNS} FROM webhook_registrations WHERE shop_domain = $1"
        ))
        .bind(shop_domain.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(WebhookRegistration::try_from).transpose()
    }

    async fn list_registrations(&self) -> Result<Vec<WebhookRegistration>, RepositoryError> {
        let rows: Vec<RegistrationRow> = sqlx::query_as(&format!(
            "SELECT {REGISTRATION_COLUMNS} FROM webhook_registrations ORDER BY shop_domain"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(WebhookRegistration::try_from)
            .collect()
    }

    async fn delete_registration(&self, shop_domain: &ShopDomain) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM webhook_registrations WHERE shop_domain = $1")
            .bind(shop_domain.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
