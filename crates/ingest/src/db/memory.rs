//! In-memory implementation of [`Store`] for tests and local runs.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use callpilot_core::{CredentialId, OrderId, ShopDomain, ShopId, UserId};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{RepositoryError, Store};
use crate::models::{
    ConnectedShop, InsertOutcome, NewOrder, Order, SHOPIFY_PLATFORM, ShopConnection,
    ShopCredential, WebhookRegistration,
};

#[derive(Debug, Default)]
struct Tables {
    credentials: BTreeMap<ShopDomain, ShopCredential>,
    shops: Vec<ConnectedShop>,
    orders: Vec<Order>,
    registrations: BTreeMap<ShopDomain, WebhookRegistration>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory store with the same uniqueness rules as the `PostgreSQL` schema.
///
/// A single lock guards all tables, so [`Store::connect_shop`] is atomic.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
    fail_writes: Arc<AtomicBool>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail with [`RepositoryError::Unavailable`].
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// All stored credentials, ordered by shop domain.
    pub async fn credentials(&self) -> Vec<ShopCredential> {
        self.tables.read().await.credentials.values().cloned().collect()
    }

    /// All stored shops, in insertion order.
    pub async fn shops(&self) -> Vec<ConnectedShop> {
        self.tables.read().await.shops.clone()
    }

    /// All stored orders, in insertion order.
    pub async fn orders(&self) -> Vec<Order> {
        self.tables.read().await.orders.clone()
    }

    /// Remove a credential, as if the merchant disconnected the shop.
    pub async fn remove_credential(&self, shop_domain: &ShopDomain) {
        self.tables.write().await.credentials.remove(shop_domain);
    }

    /// Remove every dashboard shop for a domain, leaving its credential behind.
    pub async fn remove_shops(&self, shop_domain: &ShopDomain) {
        self.tables
            .write()
            .await
            .shops
            .retain(|s| &s.shop_domain != shop_domain);
    }

    fn check_writable(&self) -> Result<(), RepositoryError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable(
                "writes disabled for this store".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn ping(&self) -> Result<(), RepositoryError> {
        Ok(())
    }

    async fn connect_shop(
        &self,
        connection: &ShopConnection,
    ) -> Result<ConnectedShop, RepositoryError> {
        self.check_writable()?;

        let mut tables = self.tables.write().await;
        let now = Utc::now();

        let previous = tables
            .credentials
            .get(&connection.shop_domain)
            .map(|c| (c.id, c.created_at, c.user_id.clone()));

        let (credential_id, created_at, user_id) = match previous {
            Some((id, created_at, previous_user)) => (
                id,
                created_at,
                connection.user_id.clone().or(previous_user),
            ),
            None => (
                CredentialId::new(tables.next_id()),
                now,
                connection.user_id.clone(),
            ),
        };

        tables.credentials.insert(
            connection.shop_domain.clone(),
            ShopCredential {
                id: credential_id,
                user_id: user_id.clone(),
                shop_domain: connection.shop_domain.clone(),
                access_token: connection.access_token.clone(),
                scope: connection.scope.clone(),
                created_at,
                updated_at: now,
            },
        );

        // The tenant keeps one active shop, and the domain has one active owner.
        for shop in &mut tables.shops {
            let other_shop_of_tenant = user_id.is_some()
                && shop.user_id == user_id
                && shop.shop_domain != connection.shop_domain;
            let previous_owner =
                shop.shop_domain == connection.shop_domain && shop.user_id != user_id;
            if shop.is_active && (other_shop_of_tenant || previous_owner) {
                shop.is_active = false;
                shop.updated_at = now;
            }
        }

        let existing = tables
            .shops
            .iter_mut()
            .find(|s| s.user_id == user_id && s.shop_domain == connection.shop_domain);

        let shop = if let Some(shop) = existing {
            shop.name = connection.shop_name();
            shop.store_url = connection.store_url();
            shop.api_key = connection.access_token.clone();
            shop.is_active = true;
            shop.updated_at = now;
            shop.clone()
        } else {
            let shop = ConnectedShop {
                id: ShopId::new(tables.next_id()),
                user_id,
                name: connection.shop_name(),
                platform: SHOPIFY_PLATFORM.to_string(),
                store_url: connection.store_url(),
                shop_domain: connection.shop_domain.clone(),
                api_key: connection.access_token.clone(),
                is_active: true,
                created_at: now,
                updated_at: now,
            };
            tables.shops.push(shop.clone());
            shop
        };

        Ok(shop)
    }

    async fn find_credential(
        &self,
        shop_domain: &ShopDomain,
    ) -> Result<Option<ShopCredential>, RepositoryError> {
        Ok(self.tables.read().await.credentials.get(shop_domain).cloned())
    }

    async fn find_shop(
        &self,
        user_id: Option<&UserId>,
        shop_domain: &ShopDomain,
    ) -> Result<Option<ConnectedShop>, RepositoryError> {
        Ok(self
            .tables
            .read()
            .await
            .shops
            .iter()
            .find(|s| s.user_id.as_ref() == user_id && &s.shop_domain == shop_domain)
            .cloned())
    }

    async fn insert_order(&self, order: &NewOrder) -> Result<InsertOutcome, RepositoryError> {
        self.check_writable()?;

        let mut tables = self.tables.write().await;
        let duplicate = tables.orders.iter().any(|o| {
            o.order.shop_id == order.shop_id && o.order.shopify_order_id == order.shopify_order_id
        });
        if duplicate {
            return Ok(InsertOutcome::Duplicate);
        }

        let id = OrderId::new(tables.next_id());
        tables.orders.push(Order {
            id,
            order: order.clone(),
            created_at: Utc::now(),
        });
        Ok(InsertOutcome::Inserted(id))
    }

    async fn save_registration(
        &self,
        registration: &WebhookRegistration,
    ) -> Result<(), RepositoryError> {
        self.check_writable()?;

        self.tables
            .write()
            .await
            .registrations
            .insert(registration.shop_domain.clone(), registration.clone());
        Ok(())
    }

    async fn due_registrations(
        &self,
        now: DateTime<Utc>,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<WebhookRegistration>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut due: Vec<WebhookRegistration> = tables
            .registrations
            .values()
            .filter(|r| r.is_due(now, max_attempts))
            .cloned()
            .collect();
        due.sort_by_key(|r| r.next_attempt_at);
        due.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(due)
    }

    async fn find_registration(
        &self,
        shop_domain: &ShopDomain,
    ) -> Result<Option<WebhookRegistration>, RepositoryError> {
        Ok(self
            .tables
            .read()
            .await
            .registrations
            .get(shop_domain)
            .cloned())
    }

    async fn list_registrations(&self) -> Result<Vec<WebhookRegistration>, RepositoryError> {
        Ok(self
            .tables
            .read()
            .await
            .registrations
            .values()
            .cloned()
            .collect())
    }

    async fn delete_registration(&self, shop_domain: &ShopDomain) -> Result<(), RepositoryError> {
        self.check_writable()?;

        self.tables.write().await.registrations.remove(shop_domain);
        Ok(())
    }
}
