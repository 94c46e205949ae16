//! HTTP route handlers for the ingestion service.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                 - Liveness check
//! GET  /health/ready           - Readiness check (database)
//!
//! # Shopify OAuth
//! GET  /shopify/auth           - Redirect the merchant to Shopify consent
//! GET  /shopify/callback       - Exchange the code, store credential and shop
//!
//! # Shopify webhooks
//! POST /shopify/webhook        - Ingest `orders/create` deliveries
//! ```
//!
//! Every route answers CORS preflight requests from any origin.

pub mod health;
pub mod oauth;
pub mod webhooks;

use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultOnResponse, OnResponse, TraceLayer};
use tracing::Span;

use crate::state::AppState;

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        .route("/shopify/auth", get(oauth::auth))
        .route("/shopify/callback", get(oauth::callback))
        .route("/shopify/webhook", post(webhooks::orders_create))
        .with_state(state)
        .layer(cors_layer())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(request_span)
                .on_response(|response: &Response<_>, latency: Duration, span: &Span| {
                    span.record("status", response.status().as_u16());
                    span.record(
                        "latency_ms",
                        u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                    );
                    DefaultOnResponse::default().on_response(response, latency, span);
                }),
        )
}

/// Span opened for every request.
///
/// Records the path only: the callback query carries the OAuth `code` and `state`.
fn request_span(request: &Request<Body>) -> Span {
    tracing::info_span!(
        "http_request",
        method = %request.method(),
        path = %request.uri().path(),
        status = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
    )
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

/// `302 Found` to `location`.
///
/// axum's `Redirect` only offers 303/307/308; Shopify's install flow expects 302.
pub(crate) fn found(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(header::LOCATION, value)]).into_response(),
        Err(_) => {
            tracing::error!(location, "Redirect target is not a valid header value");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use callpilot_core::ShopDomain;
    use secrecy::SecretString;
    use tower::ServiceExt;

    use super::*;
    use crate::config::sample_config;
    use crate::db::InMemoryStore;
    use crate::shopify::{
        AccessGrant, ShopifyApi, ShopifyError, WebhookRequest, WebhookSubscription,
    };

    /// Refuses every call; these tests never get as far as Shopify.
    struct OfflineShopify;

    #[async_trait]
    impl ShopifyApi for OfflineShopify {
        async fn exchange_code(
            &self,
            _shop: &ShopDomain,
            _code: &str,
        ) -> Result<AccessGrant, ShopifyError> {
            Err(ShopifyError::MissingAccessToken)
        }

        async fn register_webhook(
            &self,
            _shop: &ShopDomain,
            _access_token: &SecretString,
            _request: &WebhookRequest,
        ) -> Result<WebhookSubscription, ShopifyError> {
            Err(ShopifyError::Unauthorized("offline".to_string()))
        }
    }

    fn app() -> Router {
        router(AppState::new(
            sample_config(),
            Arc::new(InMemoryStore::new()),
            Arc::new(OfflineShopify),
        ))
    }

    async fn send(request: Request<Body>) -> Response {
        app().oneshot(request).await.unwrap()
    }

    #[test]
    fn test_found_sets_location() {
        let response = found("https://demo.myshopify.com/admin/oauth/authorize?x=1");
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(header::LOCATION).map(HeaderValue::as_bytes),
            Some(&b"https://demo.myshopify.com/admin/oauth/authorize?x=1"[..])
        );
    }

    #[test]
    fn test_found_rejects_invalid_location() {
        let response = found("https://bad\nheader");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_health() {
        let response = send(Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(Request::get("/health/ready").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_auth_preflight() {
        let response = send(
            Request::options("/shopify/auth")
                .header(header::ORIGIN, "http://localhost:5173")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "*"
        );
        let methods = headers
            .get(header::ACCESS_CONTROL_ALLOW_METHODS)
            .unwrap()
            .to_str()
            .unwrap();
        for method in ["GET", "POST", "OPTIONS"] {
            assert!(methods.contains(method), "{methods}");
        }
        let allowed = headers
            .get(header::ACCESS_CONTROL_ALLOW_HEADERS)
            .unwrap()
            .to_str()
            .unwrap()
            .to_ascii_lowercase();
        assert!(allowed.contains("content-type"));
        assert!(allowed.contains("authorization"));
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let response = send(Request::get("/nope").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    /// Collects the fields of every span opened while installed.
    #[derive(Clone, Default)]
    struct SpanFields(Arc<std::sync::Mutex<Vec<String>>>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for SpanFields {
        fn on_new_span(
            &self,
            attrs: &tracing::span::Attributes<'_>,
            _id: &tracing::span::Id,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            let mut visitor = FieldVisitor::default();
            attrs.record(&mut visitor);
            self.0.lock().unwrap().extend(visitor.0);
        }
    }

    #[derive(Default)]
    struct FieldVisitor(Vec<String>);

    impl tracing::field::Visit for FieldVisitor {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            self.0.push(format!("{}={value:?}", field.name()));
        }
    }

    #[test]
    fn test_request_span_omits_query() {
        use tracing_subscriber::layer::SubscriberExt;

        let fields = SpanFields::default();
        let subscriber = tracing_subscriber::registry().with(fields.clone());
        let request = Request::get("/shopify/callback?code=secret-code&state=%7B%7D")
            .body(Body::empty())
            .unwrap();

        tracing::subscriber::with_default(subscriber, || {
            let _span = request_span(&request);
        });

        let recorded = fields.0.lock().unwrap().join(" ");
        assert!(recorded.contains("path=/shopify/callback"), "{recorded}");
        assert!(recorded.contains("method=GET"), "{recorded}");
        assert!(!recorded.contains("secret-code"), "{recorded}");
        assert!(!recorded.contains("state"), "{recorded}");
    }
}
