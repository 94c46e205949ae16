//! HMAC-SHA256 signatures Shopify attaches to OAuth callbacks and webhooks.
//!
//! Both are keyed with the app's client secret:
//!
//! - OAuth callbacks carry a hex `hmac` query parameter computed over the
//!   remaining parameters, sorted by key and joined as `k=v&k=v`
//! - Webhook deliveries carry a base64 `X-Shopify-Hmac-Sha256` header
//!   computed over the raw request body
//!
//! Verification goes through [`Mac::verify_slice`], which compares in
//! constant time.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Query parameters excluded from the signed message.
const UNSIGNED_PARAMS: &[&str] = &["hmac", "signature"];

fn mac(secret: &SecretString) -> Option<HmacSha256> {
    <HmacSha256 as Mac>::new_from_slice(secret.expose_secret().as_bytes()).ok()
}

fn query_message(params: &[(String, String)]) -> String {
    let mut pairs: Vec<&(String, String)> = params
        .iter()
        .filter(|(k, _)| !UNSIGNED_PARAMS.contains(&k.as_str()))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Compute the hex signature Shopify would put in a callback's `hmac` parameter.
#[must_use]
pub fn query_signature(params: &[(String, String)], secret: &SecretString) -> String {
    mac(secret)
        .map(|mut mac| {
            mac.update(query_message(params).as_bytes());
            hex::encode(mac.finalize().into_bytes())
        })
        .unwrap_or_default()
}

/// Verify the `hmac` parameter of an OAuth callback.
///
/// `params` are the decoded query pairs, `hmac` included.
#[must_use]
pub fn verify_callback_hmac(params: &[(String, String)], secret: &SecretString) -> bool {
    let Some((_, provided)) = params.iter().find(|(k, _)| k == "hmac") else {
        return false;
    };
    let Ok(provided) = hex::decode(provided) else {
        return false;
    };
    let Some(mut mac) = mac(secret) else {
        return false;
    };

    mac.update(query_message(params).as_bytes());
    mac.verify_slice(&provided).is_ok()
}

/// Compute the base64 signature Shopify would send for a webhook body.
#[must_use]
pub fn webhook_signature(body: &[u8], secret: &SecretString) -> String {
    mac(secret)
        .map(|mut mac| {
            mac.update(body);
            BASE64.encode(mac.finalize().into_bytes())
        })
        .unwrap_or_default()
}

/// Verify the `X-Shopify-Hmac-Sha256` header of a webhook delivery.
#[must_use]
pub fn verify_webhook_hmac(body: &[u8], provided: &str, secret: &SecretString) -> bool {
    let Ok(provided) = BASE64.decode(provided.trim()) else {
        return false;
    };
    let Some(mut mac) = mac(secret) else {
        return false;
    };

    mac.update(body);
    mac.verify_slice(&provided).is_ok()
}
