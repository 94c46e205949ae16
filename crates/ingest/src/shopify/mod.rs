//! Shopify Admin API access for the OAuth handshake and webhook subscriptions.
//!
//! # Security
//!
//! Access tokens obtained here grant read/write access to a merchant's
//! orders. They are held as [`SecretString`] and never logged.
//!
//! # Architecture
//!
//! - [`ShopifyApi`] - Trait the handlers and the registrar depend on
//! - [`ShopifyClient`] - reqwest implementation talking to `https://{shop}`
//! - [`hmac`] - Signature checks for OAuth callbacks and webhook deliveries
//! - [`webhook`] - `orders/create` payload and its mapping to an order row

mod client;
pub mod hmac;
pub mod webhook;

pub use client::ShopifyClient;

use std::fmt;

use async_trait::async_trait;
use callpilot_core::ShopDomain;
use secrecy::SecretString;
use serde::Serialize;
use thiserror::Error;

/// Scopes requested during installation.
pub const OAUTH_SCOPES: &[&str] = &["read_orders", "write_orders", "read_customers"];

/// Errors that can occur when talking to Shopify.
#[derive(Debug, Error)]
pub enum ShopifyError {
    /// HTTP request failed (connection, timeout, TLS).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body was not the JSON we expected.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Shopify refused to exchange the authorization code.
    #[error("Token exchange rejected with status {status}: {body}")]
    TokenRejected {
        /// HTTP status returned by Shopify.
        status: u16,
        /// Response body, for logs.
        body: String,
    },

    /// Token exchange succeeded but the response carried no token.
    #[error("Token exchange response did not contain an access token")]
    MissingAccessToken,

    /// Shopify refused the webhook subscription.
    #[error("Webhook registration rejected with status {status}: {message}")]
    WebhookRejected {
        /// HTTP status returned by Shopify.
        status: u16,
        /// Error message or body returned by Shopify.
        message: String,
    },

    /// Rate limited by Shopify.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Authentication/authorization failed.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl ShopifyError {
    /// Whether Shopify answered but declined to issue a token.
    ///
    /// The callback reports these to the merchant as a bad request rather
    /// than an upstream failure.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::TokenRejected { .. } | Self::MissingAccessToken)
    }
}

/// Access token granted by the token exchange.
///
/// Implements `Debug` manually to redact the token.
#[derive(Clone)]
pub struct AccessGrant {
    /// Offline Admin API access token (HIGH PRIVILEGE).
    pub access_token: SecretString,
    /// Comma-separated scopes Shopify granted.
    pub scope: String,
}

impl fmt::Debug for AccessGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessGrant")
            .field("access_token", &"[REDACTED]")
            .field("scope", &self.scope)
            .finish()
    }
}

/// Body of a webhook subscription request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookRequest {
    pub topic: String,
    pub address: String,
    pub format: String,
}

impl WebhookRequest {
    /// A JSON-format subscription for `topic` delivered to `address`.
    #[must_use]
    pub fn json(topic: &str, address: &str) -> Self {
        Self {
            topic: topic.to_string(),
            address: address.to_string(),
            format: "json".to_string(),
        }
    }
}

/// Outcome of a successful webhook subscription request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebhookSubscription {
    /// Provider-side webhook id, when Shopify returned one.
    pub id: Option<i64>,
    /// Shopify reported the address as already subscribed.
    pub already_registered: bool,
}

/// Operations this service performs against a merchant's shop.
#[async_trait]
pub trait ShopifyApi: Send + Sync {
    /// Exchange an OAuth authorization code for an offline access token.
    async fn exchange_code(&self, shop: &ShopDomain, code: &str)
    -> Result<AccessGrant, ShopifyError>;

    /// Subscribe `request.address` to `request.topic` for `shop`.
    ///
    /// A subscription that already exists counts as success.
    async fn register_webhook(
        &self,
        shop: &ShopDomain,
        access_token: &SecretString,
        request: &WebhookRequest,
    ) -> Result<WebhookSubscription, ShopifyError>;
}

/// Build the URL the merchant is sent to for consent.
#[must_use]
pub fn authorization_url(
    shop: &ShopDomain,
    client_id: &str,
    redirect_uri: &str,
    scopes: &[&str],
    state: &str,
) -> String {
    let scope = scopes.join(",");
    format!(
        "https://{}/admin/oauth/authorize?client_id={}&scope={}&redirect_uri={}&state={}",
        shop,
        urlencoding::encode(client_id),
        urlencoding::encode(&scope),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(state)
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_shopify_error_display() {
        let err = ShopifyError::RateLimited(60);
        assert_eq!(err.to_string(), "Rate limited, retry after 60 seconds");

        let err = ShopifyError::WebhookRejected {
            status: 403,
            message: "forbidden".to_string(),
        };
        assert!(err.to_string().contains("403"));
    }

    #[test]
    fn test_rejection_classification() {
        assert!(ShopifyError::MissingAccessToken.is_rejection());
        assert!(
            ShopifyError::TokenRejected {
                status: 400,
                body: "invalid code".to_string()
            }
            .is_rejection()
        );
        assert!(!ShopifyError::RateLimited(1).is_rejection());
        assert!(!ShopifyError::Unauthorized("no".to_string()).is_rejection());
    }

    #[test]
    fn test_authorization_url() {
        let shop = ShopDomain::parse("demo.myshopify.com").unwrap();
        let url = authorization_url(
            &shop,
            "client-123",
            "https://ingest.example.test/shopify/callback",
            OAUTH_SCOPES,
            r#"{"nonce":"n"}"#,
        );

        assert!(url.starts_with("https://demo.myshopify.com/admin/oauth/authorize?"));
        assert!(url.contains("client_id=client-123"));
        assert!(url.contains("scope=read_orders%2Cwrite_orders%2Cread_customers"));
        assert!(url.contains(
            "redirect_uri=https%3A%2F%2Fingest.example.test%2Fshopify%2Fcallback"
        ));
        assert!(url.contains("state=%7B%22nonce%22%3A%22n%22%7D"));
    }

    #[test]
    fn test_access_grant_debug_redacts() {
        let grant = AccessGrant {
            access_token: SecretString::from("shpat_secret"),
            scope: "read_orders".to_string(),
        };
        let debug = format!("{grant:?}");
        assert!(!debug.contains("shpat_secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_webhook_request_serializes() {
        let request = WebhookRequest::json("orders/create", "https://x.test/shopify/webhook");
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["topic"], "orders/create");
        assert_eq!(json["format"], "json");
    }
}
