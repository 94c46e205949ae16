//! Domain records persisted by the ingestion service.

use std::fmt;
use std::str::FromStr;

use callpilot_core::{CredentialId, OrderId, ShopDomain, ShopId, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::Serialize;

/// Platform label written to `shops.platform`.
pub const SHOPIFY_PLATFORM: &str = "Shopify";

/// Webhook topic this service subscribes to and ingests.
pub const ORDERS_CREATE_TOPIC: &str = "orders/create";

// =============================================================================
// Credentials & Shops
// =============================================================================

/// OAuth credential for one shop (`shopify_stores` row).
///
/// Implements `Debug` manually to redact the access token.
#[derive(Clone)]
pub struct ShopCredential {
    pub id: CredentialId,
    /// Tenant that connected the shop, if the OAuth state carried one.
    pub user_id: Option<UserId>,
    pub shop_domain: ShopDomain,
    /// Offline Admin API token (HIGH PRIVILEGE - redacted in debug output).
    pub access_token: SecretString,
    /// Comma-separated scopes Shopify granted.
    pub scope: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Debug for ShopCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShopCredential")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("shop_domain", &self.shop_domain)
            .field("access_token", &"[REDACTED]")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// A shop as the dashboard sees it (`shops` row).
///
/// Implements `Debug` manually to redact the API key.
#[derive(Clone)]
pub struct ConnectedShop {
    pub id: ShopId,
    pub user_id: Option<UserId>,
    pub name: String,
    pub platform: String,
    pub store_url: String,
    pub shop_domain: ShopDomain,
    /// Copy of the access token the front-end uses for display calls.
    pub api_key: SecretString,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Debug for ConnectedShop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectedShop")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("name", &self.name)
            .field("platform", &self.platform)
            .field("store_url", &self.store_url)
            .field("shop_domain", &self.shop_domain)
            .field("api_key", &"[REDACTED]")
            .field("is_active", &self.is_active)
            .finish_non_exhaustive()
    }
}

/// Everything the callback learned about a freshly authorized shop.
///
/// Persisted atomically by [`crate::db::Store::connect_shop`].
#[derive(Clone)]
pub struct ShopConnection {
    pub user_id: Option<UserId>,
    pub shop_domain: ShopDomain,
    pub access_token: SecretString,
    pub scope: String,
}

impl ShopConnection {
    /// Shop name shown in the dashboard.
    #[must_use]
    pub fn shop_name(&self) -> String {
        self.shop_domain.display_name()
    }

    /// Storefront URL stored next to the shop.
    #[must_use]
    pub fn store_url(&self) -> String {
        self.shop_domain.store_url()
    }
}

impl fmt::Debug for ShopConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShopConnection")
            .field("user_id", &self.user_id)
            .field("shop_domain", &self.shop_domain)
            .field("access_token", &"[REDACTED]")
            .field("scope", &self.scope)
            .finish()
    }
}

// =============================================================================
// Orders
// =============================================================================

/// An order mapped from a webhook payload, ready to insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewOrder {
    pub user_id: Option<UserId>,
    pub shop_id: ShopId,
    pub shopify_order_id: String,
    pub order_number: String,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub customer_email: Option<String>,
    pub total_amount: Decimal,
    pub currency: String,
    pub order_status: String,
    pub payment_status: String,
    pub shipping_status: String,
    pub payment_method: String,
    pub country_code: Option<String>,
    pub placed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

/// A stored order (`orders` row).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Order {
    pub id: OrderId,
    #[serde(flatten)]
    pub order: NewOrder,
    pub created_at: DateTime<Utc>,
}

/// Result of inserting an order that may already exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new row was written.
    Inserted(OrderId),
    /// `(shop_id, shopify_order_id)` was already present; nothing changed.
    Duplicate,
}

// =============================================================================
// Webhook registrations
// =============================================================================

/// Provider-side subscription state for a shop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    /// Not attempted yet.
    Pending,
    /// Shopify accepted (or already had) the subscription.
    Registered,
    /// Last attempt failed; eligible for retry at `next_attempt_at`.
    Failed,
}

impl RegistrationStatus {
    /// Value stored in `webhook_registrations.status`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Registered => "registered",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegistrationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "registered" => Ok(Self::Registered),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown registration status: {other}")),
        }
    }
}

/// A `webhook_registrations` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookRegistration {
    pub shop_domain: ShopDomain,
    pub topic: String,
    pub address: String,
    pub status: RegistrationStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub provider_webhook_id: Option<i64>,
    pub next_attempt_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookRegistration {
    /// Whether the background worker should retry this row at `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>, max_attempts: i32) -> bool {
        self.status != RegistrationStatus::Registered
            && self.attempts < max_attempts
            && self.next_attempt_at <= now
    }
}
