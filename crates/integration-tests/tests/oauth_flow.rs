//! OAuth install flow: `/shopify/auth` and `/shopify/callback`.

#![allow(clippy::unwrap_used)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use callpilot_ingest::db::Store;
use callpilot_ingest::models::{RegistrationStatus, SHOPIFY_PLATFORM};
use callpilot_ingest::services::OAuthState;
use callpilot_integration_tests::{
    ACCESS_TOKEN, APP_BASE_URL, ExchangeBehavior, PUBLIC_BASE_URL, RegisterBehavior, SHOP,
    TestContext, body_text, callback_uri, location, param, query_pairs, shop,
};
use secrecy::ExposeSecret;

const CONNECTED_URL: &str = "https://app.example.test/profile?tab=stores&shopify=connected";

// ============================================================================
// /shopify/auth
// ============================================================================

#[tokio::test]
async fn test_auth_redirects_to_consent_screen() {
    let ctx = TestContext::new();

    let response = ctx
        .get("/shopify/auth?shop=demo-store.myshopify.com&user_id=u1")
        .await;

    assert_eq!(response.status(), StatusCode::FOUND);
    let target = location(&response);
    assert!(target.starts_with("https://demo-store.myshopify.com/admin/oauth/authorize?"));

    let pairs = query_pairs(&target);
    assert_eq!(param(&pairs, "client_id"), Some("test_client_id"));
    assert_eq!(
        param(&pairs, "scope"),
        Some("read_orders,write_orders,read_customers")
    );
    assert_eq!(
        param(&pairs, "redirect_uri"),
        Some(format!("{PUBLIC_BASE_URL}/shopify/callback").as_str())
    );

    let state: OAuthState = serde_json::from_str(param(&pairs, "state").unwrap()).unwrap();
    assert_eq!(state.user_id.as_deref(), Some("u1"));
    assert!(ctx.state.state_signer().verify(param(&pairs, "state").unwrap()).is_ok());
}

#[tokio::test]
async fn test_auth_nonce_is_fresh_per_request() {
    let ctx = TestContext::new();
    let uri = "/shopify/auth?shop=demo-store.myshopify.com";

    let first = query_pairs(&location(&ctx.get(uri).await));
    let second = query_pairs(&location(&ctx.get(uri).await));

    let first: OAuthState = serde_json::from_str(param(&first, "state").unwrap()).unwrap();
    let second: OAuthState = serde_json::from_str(param(&second, "state").unwrap()).unwrap();
    assert_ne!(first.nonce, second.nonce);
    assert_eq!(first.user_id, None);
}

#[tokio::test]
async fn test_auth_requires_shop() {
    let ctx = TestContext::new();

    for uri in ["/shopify/auth", "/shopify/auth?shop=", "/shopify/auth?user_id=u1"] {
        let response = ctx.get(uri).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body_text(response).await, "Missing shop parameter");
    }
    assert_eq!(ctx.shopify.call_count(), 0);
}

#[tokio::test]
async fn test_auth_rejects_foreign_shop() {
    let ctx = TestContext::new();

    let response = ctx.get("/shopify/auth?shop=evil.example.com").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_text(response).await, "Invalid shop domain");
}

#[tokio::test]
async fn test_auth_preflight_allows_any_origin() {
    let ctx = TestContext::new();

    let response = ctx
        .send(
            Request::options("/shopify/auth")
                .header("origin", "https://app.example.test")
                .header("access-control-request-method", "GET")
                .header("access-control-request-headers", "authorization")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "*"
    );
}

// ============================================================================
// /shopify/callback
// ============================================================================

#[tokio::test]
async fn test_callback_connects_shop() {
    let ctx = TestContext::new();

    let response = ctx.connect(SHOP, Some("u1")).await;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), CONNECTED_URL);
    assert!(CONNECTED_URL.starts_with(APP_BASE_URL));

    let exchanges = ctx.shopify.exchanges();
    assert_eq!(exchanges.len(), 1);
    assert_eq!(exchanges[0].1, "auth-code");

    let credentials = ctx.store.credentials().await;
    assert_eq!(credentials.len(), 1);
    assert_eq!(credentials[0].access_token.expose_secret(), ACCESS_TOKEN);
    assert_eq!(credentials[0].user_id.as_ref().unwrap().as_str(), "u1");

    let shops = ctx.store.shops().await;
    assert_eq!(shops.len(), 1);
    let connected = &shops[0];
    assert_eq!(connected.name, "Demo Store");
    assert_eq!(connected.platform, SHOPIFY_PLATFORM);
    assert_eq!(connected.store_url, "https://demo-store.myshopify.com");
    assert_eq!(connected.api_key.expose_secret(), ACCESS_TOKEN);
    assert!(connected.is_active);
}

#[tokio::test]
async fn test_callback_registers_orders_webhook() {
    let ctx = TestContext::new();

    ctx.connect(SHOP, Some("u1")).await;

    let registrations = ctx.shopify.registrations();
    assert_eq!(registrations.len(), 1);
    assert_eq!(registrations[0].shop, shop());
    assert_eq!(registrations[0].access_token, ACCESS_TOKEN);
    assert_eq!(registrations[0].request.topic, "orders/create");
    assert_eq!(
        registrations[0].request.address,
        format!("{PUBLIC_BASE_URL}/shopify/webhook")
    );
    assert_eq!(registrations[0].request.format, "json");

    let stored = ctx.store.find_registration(&shop()).await.unwrap().unwrap();
    assert_eq!(stored.status, RegistrationStatus::Registered);
    assert_eq!(stored.provider_webhook_id, Some(901));
}

#[tokio::test]
async fn test_callback_treats_existing_subscription_as_registered() {
    let ctx = TestContext::new();
    ctx.shopify.set_register(RegisterBehavior::AlreadyTaken);

    let response = ctx.connect(SHOP, Some("u1")).await;

    assert_eq!(response.status(), StatusCode::FOUND);
    let stored = ctx.store.find_registration(&shop()).await.unwrap().unwrap();
    assert_eq!(stored.status, RegistrationStatus::Registered);
}

#[tokio::test]
async fn test_callback_survives_failed_registration() {
    let ctx = TestContext::new();
    ctx.shopify.set_register(RegisterBehavior::Fail);

    let response = ctx.connect(SHOP, Some("u1")).await;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), CONNECTED_URL);
    assert_eq!(ctx.store.shops().await.len(), 1);

    let stored = ctx.store.find_registration(&shop()).await.unwrap().unwrap();
    assert_eq!(stored.status, RegistrationStatus::Failed);
    assert_eq!(stored.attempts, 1);
    assert!(stored.last_error.unwrap().contains("503"));
}

#[tokio::test]
async fn test_callback_requires_shop_and_code() {
    let ctx = TestContext::new();

    for pairs in [
        vec![("code", "abc")],
        vec![("shop", SHOP)],
        vec![("shop", SHOP), ("code", "")],
    ] {
        let response = ctx.get(&ctx.signed_callback_uri(&pairs)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(response).await, "Missing parameters");
    }

    assert_eq!(ctx.shopify.call_count(), 0);
    assert!(ctx.store.credentials().await.is_empty());
}

#[tokio::test]
async fn test_callback_rejects_bad_hmac() {
    let ctx = TestContext::new();
    let state = ctx.issue_state(Some("u1"));
    let signed = ctx.signed_callback_uri(&[("shop", SHOP), ("code", "abc"), ("state", &state)]);

    // Same signature, different code.
    let tampered = signed.replace("code=abc", "code=abd");
    let response = ctx.get(&tampered).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let unsigned = callback_uri(&[
        ("shop".to_string(), SHOP.to_string()),
        ("code".to_string(), "abc".to_string()),
    ]);
    let response = ctx.get(&unsigned).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    assert_eq!(ctx.shopify.call_count(), 0);
    assert!(ctx.store.shops().await.is_empty());
}

#[tokio::test]
async fn test_callback_without_hmac_check() {
    let mut config = callpilot_integration_tests::test_config();
    config.shopify.verify_hmac = false;
    let ctx = TestContext::with_config(config);

    let uri = callback_uri(&[
        ("shop".to_string(), SHOP.to_string()),
        ("code".to_string(), "abc".to_string()),
    ]);
    let response = ctx.get(&uri).await;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(ctx.store.shops().await.len(), 1);
}

#[tokio::test]
async fn test_callback_token_rejected() {
    for behavior in [ExchangeBehavior::Rejected, ExchangeBehavior::NoToken] {
        let ctx = TestContext::new();
        ctx.shopify.set_exchange(behavior);

        let response = ctx.connect(SHOP, Some("u1")).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(response).await, "Failed to get access token");
        assert!(ctx.store.credentials().await.is_empty());
        assert!(ctx.store.shops().await.is_empty());
        assert!(ctx.shopify.registrations().is_empty());
        assert!(ctx.store.list_registrations().await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_callback_provider_unreachable_is_bad_gateway() {
    let ctx = TestContext::new();
    ctx.shopify.set_exchange(ExchangeBehavior::Broken);

    let response = ctx.connect(SHOP, Some("u1")).await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(ctx.store.credentials().await.is_empty());
}

#[tokio::test]
async fn test_callback_persistence_failure() {
    let ctx = TestContext::new();
    ctx.store.set_fail_writes(true);

    let response = ctx.connect(SHOP, Some("u1")).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(ctx.shopify.registrations().is_empty());
    assert!(ctx.store.shops().await.is_empty());
}

#[tokio::test]
async fn test_callback_with_invalid_state_connects_without_user() {
    let ctx = TestContext::new();
    let forged = r#"{"nonce":"7c1d2f0e-8a4b-4c55-9d1e-2b3c4d5e6f70","user_id":"u1","issued_at":0,"sig":"00"}"#;

    for state in ["not-json", forged] {
        let uri = ctx.signed_callback_uri(&[("shop", SHOP), ("code", "abc"), ("state", state)]);
        let response = ctx.get(&uri).await;
        assert_eq!(response.status(), StatusCode::FOUND);
    }

    let shops = ctx.store.shops().await;
    assert_eq!(shops.len(), 1);
    assert_eq!(shops[0].user_id, None);
}

#[tokio::test]
async fn test_reconnect_updates_token_in_place() {
    let ctx = TestContext::new();
    ctx.connect(SHOP, Some("u1")).await;

    ctx.shopify
        .set_exchange(ExchangeBehavior::Grant("shpat_rotated".to_string()));
    ctx.connect(SHOP, Some("u1")).await;

    let credentials = ctx.store.credentials().await;
    assert_eq!(credentials.len(), 1);
    assert_eq!(credentials[0].access_token.expose_secret(), "shpat_rotated");

    let shops = ctx.store.shops().await;
    assert_eq!(shops.len(), 1);
    assert_eq!(shops[0].api_key.expose_secret(), "shpat_rotated");
}

#[tokio::test]
async fn test_connecting_second_shop_deactivates_first() {
    let ctx = TestContext::new();
    ctx.connect(SHOP, Some("u1")).await;
    ctx.connect("other-shop.myshopify.com", Some("u1")).await;

    let shops = ctx.store.shops().await;
    assert_eq!(shops.len(), 2);
    let active: Vec<_> = shops.iter().filter(|s| s.is_active).collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].shop_domain.as_str(), "other-shop.myshopify.com");
    assert_eq!(active[0].name, "Other Shop");
}
