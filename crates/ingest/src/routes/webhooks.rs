//! Shopify webhook ingestion.
//!
//! Only `orders/create` is acted on. Deliveries for any other topic are
//! acknowledged without touching the store so Shopify stops retrying them.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use callpilot_core::ShopDomain;
use tracing::instrument;

use crate::error::AppError;
use crate::models::{InsertOutcome, ORDERS_CREATE_TOPIC};
use crate::shopify::hmac::verify_webhook_hmac;
use crate::shopify::webhook::OrderPayload;
use crate::state::AppState;

const TOPIC_HEADERS: &[&str] = &["x-shopify-topic", "x-topic"];
const SHOP_HEADERS: &[&str] = &["x-shopify-shop-domain", "x-shop-domain"];
const HMAC_HEADER: &str = "x-shopify-hmac-sha256";

/// Handle a webhook delivery.
#[instrument(skip_all, fields(topic = tracing::field::Empty, shop = tracing::field::Empty))]
pub async fn orders_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<&'static str, AppError> {
    let topic = first_header(&headers, TOPIC_HEADERS);
    tracing::Span::current().record("topic", topic.unwrap_or_default());
    if topic != Some(ORDERS_CREATE_TOPIC) {
        tracing::debug!("Ignoring webhook topic");
        return Ok("OK");
    }

    let shopify = &state.config().shopify;
    if shopify.verify_hmac {
        let verified = first_header(&headers, &[HMAC_HEADER])
            .is_some_and(|sig| verify_webhook_hmac(&body, sig, &shopify.client_secret));
        if !verified {
            return Err(AppError::Unauthorized("Invalid signature".to_string()));
        }
    }

    // A shop that cannot be named cannot have a stored credential either.
    let shop = first_header(&headers, SHOP_HEADERS)
        .and_then(|raw| ShopDomain::parse(raw).ok())
        .ok_or_else(|| AppError::NotFound("Store not found".to_string()))?;
    tracing::Span::current().record("shop", shop.as_str());

    let payload = OrderPayload::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid payload: {e}")))?;
    let shopify_order_id = payload
        .order_id()
        .map_err(|e| AppError::BadRequest(format!("Invalid payload: {e}")))?;

    let store = state.store();
    let credential = store
        .find_credential(&shop)
        .await?
        .ok_or_else(|| AppError::NotFound("Store not found".to_string()))?;
    let connected = store
        .find_shop(credential.user_id.as_ref(), &shop)
        .await?
        .ok_or_else(|| AppError::NotFound("Shop not found".to_string()))?;

    let order = payload
        .into_new_order(
            credential.user_id,
            connected.id,
            &state.config().default_currency,
        )
        .map_err(|e| AppError::BadRequest(format!("Invalid payload: {e}")))?;

    match store
        .insert_order(&order)
        .await
        .map_err(AppError::OrderNotSaved)?
    {
        InsertOutcome::Inserted(order_id) => {
            tracing::info!(
                order_id = %order_id,
                shop_id = %connected.id,
                shopify_order_id = %shopify_order_id,
                "order ingested"
            );
        }
        InsertOutcome::Duplicate => {
            tracing::info!(
                shop_id = %connected.id,
                shopify_order_id = %shopify_order_id,
                "Duplicate order delivery ignored"
            );
        }
    }

    Ok("OK")
}

/// First non-empty value among `names`, in order.
fn first_header<'a>(headers: &'a HeaderMap, names: &[&str]) -> Option<&'a str> {
    names.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn test_first_header_prefers_shopify_name() {
        let mut headers = HeaderMap::new();
        headers.insert("x-topic", HeaderValue::from_static("orders/updated"));
        headers.insert("x-shopify-topic", HeaderValue::from_static("orders/create"));

        assert_eq!(first_header(&headers, TOPIC_HEADERS), Some("orders/create"));
    }

    #[test]
    fn test_first_header_falls_back() {
        let mut headers = HeaderMap::new();
        headers.insert("x-shopify-shop-domain", HeaderValue::from_static("  "));
        headers.insert("x-shop-domain", HeaderValue::from_static("demo.myshopify.com"));

        assert_eq!(
            first_header(&headers, SHOP_HEADERS),
            Some("demo.myshopify.com")
        );
        assert_eq!(first_header(&HeaderMap::new(), SHOP_HEADERS), None);
    }
}
