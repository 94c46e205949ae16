//! reqwest-backed [`ShopifyApi`] implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use callpilot_core::ShopDomain;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::{AccessGrant, ShopifyApi, ShopifyError, WebhookRequest, WebhookSubscription};
use crate::config::ShopifyConfig;

/// Applied to every outbound request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Marker Shopify puts in a 422 when the address is already subscribed.
const ALREADY_TAKEN: &str = "already been taken";

/// Shopify Admin API client for OAuth and webhook subscriptions.
///
/// Cheap to clone; the HTTP connection pool is shared.
#[derive(Clone)]
pub struct ShopifyClient {
    inner: Arc<ShopifyClientInner>,
}

struct ShopifyClientInner {
    client: reqwest::Client,
    client_id: String,
    client_secret: SecretString,
    api_version: String,
    /// Replaces `https://{shop}` when set (local mocks).
    base_url: Option<String>,
}

#[derive(Serialize)]
struct TokenExchangeRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    code: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenExchangeResponse {
    access_token: Option<String>,
    #[serde(default)]
    scope: String,
}

#[derive(Serialize)]
struct WebhookEnvelope<'a> {
    webhook: &'a WebhookRequest,
}

#[derive(Debug, Deserialize)]
struct WebhookResponse {
    webhook: Option<WebhookResponseBody>,
}

#[derive(Debug, Deserialize)]
struct WebhookResponseBody {
    id: Option<i64>,
}

impl ShopifyClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns `ShopifyError::Http` if the HTTP client cannot be built.
    pub fn new(config: &ShopifyConfig) -> Result<Self, ShopifyError> {
        Self::build(config, None)
    }

    /// Create a client that sends every request to `base_url` instead of the shop.
    ///
    /// # Errors
    ///
    /// Returns `ShopifyError::Http` if the HTTP client cannot be built.
    pub fn with_base_url(config: &ShopifyConfig, base_url: &str) -> Result<Self, ShopifyError> {
        Self::build(config, Some(base_url.trim_end_matches('/').to_string()))
    }

    fn build(config: &ShopifyConfig, base_url: Option<String>) -> Result<Self, ShopifyError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            inner: Arc::new(ShopifyClientInner {
                client,
                client_id: config.client_id.clone(),
                client_secret: config.client_secret.clone(),
                api_version: config.api_version.clone(),
                base_url,
            }),
        })
    }

    fn shop_url(&self, shop: &ShopDomain, path: &str) -> String {
        self.inner.base_url.as_ref().map_or_else(
            || format!("https://{shop}{path}"),
            |base| format!("{base}{path}"),
        )
    }
}

#[async_trait]
impl ShopifyApi for ShopifyClient {
    #[instrument(skip(self, code), fields(shop = %shop))]
    async fn exchange_code(
        &self,
        shop: &ShopDomain,
        code: &str,
    ) -> Result<AccessGrant, ShopifyError> {
        let url = self.shop_url(shop, "/admin/oauth/access_token");

        let body = TokenExchangeRequest {
            client_id: &self.inner.client_id,
            client_secret: self.inner.client_secret.expose_secret(),
            code,
        };

        let response = self.inner.client.post(&url).json(&body).send().await?;
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ShopifyError::TokenRejected {
                status: status.as_u16(),
                body: text,
            });
        }

        let text = response.text().await?;
        let token: TokenExchangeResponse = serde_json::from_str(&text)?;

        match token.access_token {
            Some(access_token) if !access_token.is_empty() => Ok(AccessGrant {
                access_token: SecretString::from(access_token),
                scope: token.scope,
            }),
            _ => Err(ShopifyError::MissingAccessToken),
        }
    }

    #[instrument(skip(self, access_token, request), fields(shop = %shop, topic = %request.topic))]
    async fn register_webhook(
        &self,
        shop: &ShopDomain,
        access_token: &SecretString,
        request: &WebhookRequest,
    ) -> Result<WebhookSubscription, ShopifyError> {
        let url = self.shop_url(
            shop,
            &format!("/admin/api/{}/webhooks.json", self.inner.api_version),
        );

        let response = self
            .inner
            .client
            .post(&url)
            .header("X-Shopify-Access-Token", access_token.expose_secret())
            .json(&WebhookEnvelope { webhook: request })
            .send()
            .await?;

        let status = response.status();

        // Check for rate limiting
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);
            return Err(ShopifyError::RateLimited(retry_after));
        }

        // Check for unauthorized
        if status == StatusCode::UNAUTHORIZED {
            return Err(ShopifyError::Unauthorized(
                "Invalid or expired access token".to_string(),
            ));
        }

        let text = response.text().await.unwrap_or_default();

        if status.is_success() {
            let id = serde_json::from_str::<WebhookResponse>(&text)
                .ok()
                .and_then(|r| r.webhook)
                .and_then(|w| w.id);
            return Ok(WebhookSubscription {
                id,
                already_registered: false,
            });
        }

        if status == StatusCode::UNPROCESSABLE_ENTITY && text.contains(ALREADY_TAKEN) {
            tracing::debug!("Webhook address already subscribed");
            return Ok(WebhookSubscription {
                id: None,
                already_registered: true,
            });
        }

        Err(ShopifyError::WebhookRejected {
            status: status.as_u16(),
            message: text,
        })
    }
}
