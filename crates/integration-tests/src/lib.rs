//! Integration tests for Callpilot ingest.
//!
//! # Running Tests
//!
//! ```bash
//! # In-process tests (no external services)
//! cargo test -p callpilot-integration-tests
//!
//! # Including the PostgreSQL store tests
//! INGEST_TEST_DATABASE_URL=postgres://localhost/callpilot_test \
//!     cargo test -p callpilot-integration-tests -- --include-ignored
//! ```
//!
//! # Test Harness
//!
//! [`TestContext`] drives the real router in-process with an
//! [`InMemoryStore`] and a scripted [`FakeShopify`]. Requests are signed the
//! way Shopify signs them so HMAC verification stays enabled.

#![allow(clippy::missing_panics_doc)]

use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response};
use callpilot_core::{DEFAULT_CURRENCY, ShopDomain};
use callpilot_ingest::config::{IngestConfig, OAuthStateConfig, RegistrationConfig, ShopifyConfig};
use callpilot_ingest::db::InMemoryStore;
use callpilot_ingest::services::StateSigner;
use callpilot_ingest::shopify::hmac::{query_signature, webhook_signature};
use callpilot_ingest::shopify::{
    AccessGrant, ShopifyApi, ShopifyError, WebhookRequest, WebhookSubscription,
};
use callpilot_ingest::{AppState, router};
use secrecy::{ExposeSecret, SecretString};
use tower::ServiceExt;

/// Shopify client secret used to sign test callbacks and webhooks.
pub const CLIENT_SECRET: &str = "shpss_integration_test_secret_0123456789";
pub const PUBLIC_BASE_URL: &str = "https://ingest.example.test";
pub const APP_BASE_URL: &str = "https://app.example.test";
pub const SHOP: &str = "demo-store.myshopify.com";
pub const ACCESS_TOKEN: &str = "shpat_test_token";

/// Ingest configuration pointing at nothing real.
#[must_use]
pub fn test_config() -> IngestConfig {
    IngestConfig {
        database_url: SecretString::from("postgres://localhost/unused"),
        host: IpAddr::from([127, 0, 0, 1]),
        port: 0,
        public_base_url: PUBLIC_BASE_URL.to_string(),
        app_base_url: APP_BASE_URL.to_string(),
        shopify: ShopifyConfig {
            client_id: "test_client_id".to_string(),
            client_secret: SecretString::from(CLIENT_SECRET),
            api_version: "2024-01".to_string(),
            verify_hmac: true,
        },
        oauth_state: OAuthStateConfig {
            secret: SecretString::from("integration-state-secret-0123456789abcdef"),
            ttl: Duration::from_secs(600),
        },
        default_currency: DEFAULT_CURRENCY.to_string(),
        registration: RegistrationConfig::default(),
        sentry_dsn: None,
        sentry_environment: None,
        sentry_sample_rate: 0.0,
        sentry_traces_sample_rate: 0.0,
    }
}

#[must_use]
pub fn shop() -> ShopDomain {
    ShopDomain::parse(SHOP).expect("valid test shop")
}

// =============================================================================
// Fake Shopify
// =============================================================================

/// How [`FakeShopify`] answers the token exchange.
#[derive(Debug, Clone)]
pub enum ExchangeBehavior {
    /// Grant this token.
    Grant(String),
    /// 2xx without `access_token`.
    NoToken,
    /// Non-2xx response.
    Rejected,
    /// Unparsable response.
    Broken,
}

/// How [`FakeShopify`] answers webhook subscriptions.
#[derive(Debug, Clone, Copy)]
pub enum RegisterBehavior {
    Created,
    AlreadyTaken,
    Fail,
}

/// A webhook subscription request as seen by Shopify.
#[derive(Debug, Clone)]
pub struct RecordedRegistration {
    pub shop: ShopDomain,
    pub access_token: String,
    pub request: WebhookRequest,
}

/// Scripted [`ShopifyApi`] that records every call.
#[derive(Debug)]
pub struct FakeShopify {
    exchange: Mutex<ExchangeBehavior>,
    register: Mutex<RegisterBehavior>,
    exchanges: Mutex<Vec<(ShopDomain, String)>>,
    registrations: Mutex<Vec<RecordedRegistration>>,
}

impl Default for FakeShopify {
    fn default() -> Self {
        Self {
            exchange: Mutex::new(ExchangeBehavior::Grant(ACCESS_TOKEN.to_string())),
            register: Mutex::new(RegisterBehavior::Created),
            exchanges: Mutex::default(),
            registrations: Mutex::default(),
        }
    }
}

impl FakeShopify {
    pub fn set_exchange(&self, behavior: ExchangeBehavior) {
        *self.exchange.lock().expect("lock") = behavior;
    }

    pub fn set_register(&self, behavior: RegisterBehavior) {
        *self.register.lock().expect("lock") = behavior;
    }

    /// `(shop, code)` for every token exchange, in order.
    #[must_use]
    pub fn exchanges(&self) -> Vec<(ShopDomain, String)> {
        self.exchanges.lock().expect("lock").clone()
    }

    #[must_use]
    pub fn registrations(&self) -> Vec<RecordedRegistration> {
        self.registrations.lock().expect("lock").clone()
    }

    /// Number of outbound calls of any kind.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.exchanges.lock().expect("lock").len() + self.registrations.lock().expect("lock").len()
    }
}

#[async_trait]
impl ShopifyApi for FakeShopify {
    async fn exchange_code(&self, shop: &ShopDomain, code: &str) -> Result<AccessGrant, ShopifyError> {
        self.exchanges
            .lock()
            .expect("lock")
            .push((shop.clone(), code.to_string()));

        let behavior = self.exchange.lock().expect("lock").clone();
        match behavior {
            ExchangeBehavior::Grant(token) => Ok(AccessGrant {
                access_token: SecretString::from(token),
                scope: "read_orders,write_orders,read_customers".to_string(),
            }),
            ExchangeBehavior::NoToken => Err(ShopifyError::MissingAccessToken),
            ExchangeBehavior::Rejected => Err(ShopifyError::TokenRejected {
                status: 400,
                body: r#"{"error":"invalid_request"}"#.to_string(),
            }),
            ExchangeBehavior::Broken => Err(ShopifyError::Parse(
                serde_json::from_str::<serde_json::Value>("<html>").expect_err("not json"),
            )),
        }
    }

    async fn register_webhook(
        &self,
        shop: &ShopDomain,
        access_token: &SecretString,
        request: &WebhookRequest,
    ) -> Result<WebhookSubscription, ShopifyError> {
        self.registrations
            .lock()
            .expect("lock")
            .push(RecordedRegistration {
                shop: shop.clone(),
                access_token: access_token.expose_secret().to_string(),
                request: request.clone(),
            });

        let behavior = *self.register.lock().expect("lock");
        match behavior {
            RegisterBehavior::Created => Ok(WebhookSubscription {
                id: Some(901),
                already_registered: false,
            }),
            RegisterBehavior::AlreadyTaken => Ok(WebhookSubscription {
                id: None,
                already_registered: true,
            }),
            RegisterBehavior::Fail => Err(ShopifyError::WebhookRejected {
                status: 503,
                message: "Service unavailable".to_string(),
            }),
        }
    }
}

// =============================================================================
// Test Context
// =============================================================================

/// The service wired to in-memory collaborators.
pub struct TestContext {
    pub config: IngestConfig,
    pub state: AppState,
    pub store: InMemoryStore,
    pub shopify: Arc<FakeShopify>,
    app: Router,
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TestContext {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    #[must_use]
    pub fn with_config(config: IngestConfig) -> Self {
        let store = InMemoryStore::new();
        let shopify = Arc::new(FakeShopify::default());
        let state = AppState::new(config.clone(), Arc::new(store.clone()), shopify.clone());
        let app = router(state.clone());

        Self {
            config,
            state,
            store,
            shopify,
            app,
        }
    }

    /// Send a request through the router.
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Request::get(uri).body(Body::empty()).expect("request"))
            .await
    }

    /// A signed `state` for `user_id`, as `/shopify/auth` would issue it.
    #[must_use]
    pub fn issue_state(&self, user_id: Option<&str>) -> String {
        StateSigner::encode(&self.state.state_signer().issue(user_id))
    }

    /// Callback URI carrying a valid Shopify `hmac` over the given pairs.
    #[must_use]
    pub fn signed_callback_uri(&self, pairs: &[(&str, &str)]) -> String {
        let mut owned: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        owned.push(("timestamp".to_string(), "1700000000".to_string()));
        let hmac = query_signature(&owned, &self.config.shopify.client_secret);
        owned.push(("hmac".to_string(), hmac));
        callback_uri(&owned)
    }

    /// Run the OAuth callback for `shop` on behalf of `user_id`.
    pub async fn connect(&self, shop: &str, user_id: Option<&str>) -> Response<Body> {
        let state = self.issue_state(user_id);
        let uri = self.signed_callback_uri(&[("shop", shop), ("code", "auth-code"), ("state", &state)]);
        self.get(&uri).await
    }

    /// Deliver a webhook signed with the client secret.
    pub async fn deliver(&self, topic: &str, shop: &str, body: &str) -> Response<Body> {
        let signature = webhook_signature(body.as_bytes(), &self.config.shopify.client_secret);
        self.send(webhook_request(topic, shop, Some(&signature), body))
            .await
    }
}

/// Encode query pairs into a `/shopify/callback` URI.
#[must_use]
pub fn callback_uri(pairs: &[(String, String)]) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish();
    format!("/shopify/callback?{query}")
}

/// Build a `POST /shopify/webhook` request.
#[must_use]
pub fn webhook_request(
    topic: &str,
    shop: &str,
    signature: Option<&str>,
    body: &str,
) -> Request<Body> {
    let mut builder = Request::post("/shopify/webhook")
        .header("content-type", "application/json")
        .header("x-shopify-topic", topic)
        .header("x-shopify-shop-domain", shop);
    if let Some(signature) = signature {
        builder = builder.header("x-shopify-hmac-sha256", signature);
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("request")
}

/// Read a response body as UTF-8 text.
pub async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("body");
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

/// `Location` header of a redirect.
#[must_use]
pub fn location(response: &Response<Body>) -> String {
    response
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .expect("location header")
        .to_string()
}

/// Query pairs of an absolute URL.
#[must_use]
pub fn query_pairs(url: &str) -> Vec<(String, String)> {
    url::Url::parse(url)
        .expect("absolute url")
        .query_pairs()
        .into_owned()
        .collect()
}

/// Value of `key` in `pairs`.
#[must_use]
pub fn param<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// A realistic `orders/create` payload.
#[must_use]
pub fn order_payload(id: i64) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "order_number": 1001,
        "name": "#1001",
        "customer": {
            "first_name": "Ana",
            "last_name": "Pop",
            "phone": "+40700000001",
            "email": "ana@example.test"
        },
        "shipping_address": {"phone": "+40700000002", "country_code": "RO"},
        "billing_address": {"phone": "+40700000003", "country_code": "RO"},
        "total_price": "249.90",
        "currency": "RON",
        "financial_status": "paid",
        "fulfillment_status": null,
        "payment_gateway_names": ["cash_on_delivery"],
        "created_at": "2024-05-01T12:00:00+03:00",
        "note": "Call before delivery"
    })
}
