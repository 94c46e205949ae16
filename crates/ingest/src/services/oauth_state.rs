//! Signed, expiring OAuth `state` blob.
//!
//! The blob travels through Shopify's consent screen and comes back on the
//! callback. It is plain JSON so the callback can read the tenant back out:
//!
//! ```json
//! {"nonce":"…","user_id":"u1","issued_at":1700000000,"sig":"…"}
//! ```
//!
//! `sig` is a hex HMAC-SHA256 over `nonce|user_id|issued_at` keyed with
//! `STATE_SECRET`, so a tampered or replayed-late blob is rejected.

use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

use crate::config::OAuthStateConfig;

type HmacSha256 = Hmac<Sha256>;

/// Tolerated clock skew for blobs issued "in the future".
const MAX_CLOCK_SKEW_SECS: i64 = 60;

/// Why a `state` blob was not accepted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    /// Not JSON, or missing fields.
    #[error("malformed state: {0}")]
    Malformed(String),

    /// Signature does not match the contents.
    #[error("state signature mismatch")]
    InvalidSignature,

    /// Issued longer ago than the configured lifetime (or too far in the future).
    #[error("state expired")]
    Expired,
}

/// Decoded `state` blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthState {
    pub nonce: Uuid,
    pub user_id: Option<String>,
    pub issued_at: i64,
    pub sig: String,
}

/// Issues and verifies [`OAuthState`] blobs.
#[derive(Clone)]
pub struct StateSigner {
    secret: SecretString,
    ttl: Duration,
}

impl std::fmt::Debug for StateSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateSigner")
            .field("secret", &"[REDACTED]")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl StateSigner {
    #[must_use]
    pub const fn new(secret: SecretString, ttl: Duration) -> Self {
        Self { secret, ttl }
    }

    #[must_use]
    pub fn from_config(config: &OAuthStateConfig) -> Self {
        Self::new(config.secret.clone(), config.ttl)
    }

    /// Issue a fresh state for `user_id` at the current time.
    #[must_use]
    pub fn issue(&self, user_id: Option<&str>) -> OAuthState {
        self.issue_at(user_id, Utc::now().timestamp())
    }

    fn issue_at(&self, user_id: Option<&str>, issued_at: i64) -> OAuthState {
        let nonce = Uuid::new_v4();
        let user_id = user_id.map(str::to_string);
        let sig = self.sign(&nonce, user_id.as_deref(), issued_at);
        OAuthState {
            nonce,
            user_id,
            issued_at,
            sig,
        }
    }

    /// Serialize a state to the JSON text placed in the authorization URL.
    #[must_use]
    pub fn encode(state: &OAuthState) -> String {
        // Serializing a struct of strings and integers cannot fail.
        serde_json::to_string(state).unwrap_or_default()
    }

    /// Decode and verify a `state` value received on the callback.
    ///
    /// Accepts either the JSON text itself or a still-percent-encoded copy.
    ///
    /// # Errors
    ///
    /// Returns `StateError` if the value is malformed, its signature does not
    /// match, or it is outside the allowed lifetime.
    pub fn verify(&self, raw: &str) -> Result<OAuthState, StateError> {
        self.verify_at(raw, Utc::now().timestamp())
    }

    fn verify_at(&self, raw: &str, now: i64) -> Result<OAuthState, StateError> {
        let state = parse_state(raw)?;

        let Some(mut mac) = self.mac() else {
            return Err(StateError::InvalidSignature);
        };
        let message = signed_message(&state.nonce, state.user_id.as_deref(), state.issued_at);
        mac.update(message.as_bytes());
        let provided = hex::decode(&state.sig).map_err(|_| StateError::InvalidSignature)?;
        mac.verify_slice(&provided)
            .map_err(|_| StateError::InvalidSignature)?;

        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        let age = now - state.issued_at;
        if age > ttl || age < -MAX_CLOCK_SKEW_SECS {
            return Err(StateError::Expired);
        }

        Ok(state)
    }

    fn sign(&self, nonce: &Uuid, user_id: Option<&str>, issued_at: i64) -> String {
        self.mac()
            .map(|mut mac| {
                mac.update(signed_message(nonce, user_id, issued_at).as_bytes());
                hex::encode(mac.finalize().into_bytes())
            })
            .unwrap_or_default()
    }

    fn mac(&self) -> Option<HmacSha256> {
        <HmacSha256 as Mac>::new_from_slice(self.secret.expose_secret().as_bytes()).ok()
    }
}

fn signed_message(nonce: &Uuid, user_id: Option<&str>, issued_at: i64) -> String {
    format!("{nonce}|{}|{issued_at}", user_id.unwrap_or_default())
}

fn parse_state(raw: &str) -> Result<OAuthState, StateError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(StateError::Malformed("empty".to_string()));
    }

    match serde_json::from_str(trimmed) {
        Ok(state) => Ok(state),
        Err(first) => {
            let decoded = urlencoding::decode(trimmed)
                .map_err(|_| StateError::Malformed(first.to_string()))?;
            serde_json::from_str(&decoded).map_err(|e| StateError::Malformed(e.to_string()))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn signer() -> StateSigner {
        StateSigner::new(
            SecretString::from("0123456789abcdef0123456789abcdef"),
            Duration::from_secs(600),
        )
    }

    #[test]
    fn test_issue_and_verify() {
        let signer = signer();
        let state = signer.issue(Some("u1"));
        let encoded = StateSigner::encode(&state);

        let verified = signer.verify(&encoded).unwrap();
        assert_eq!(verified, state);
        assert_eq!(verified.user_id.as_deref(), Some("u1"));
    }

    #[test]
    fn test_state_is_plain_json() {
        let state = signer().issue(Some("u1"));
        let value: serde_json::Value =
            serde_json::from_str(&StateSigner::encode(&state)).unwrap();

        assert_eq!(value["user_id"], "u1");
        assert_eq!(value["nonce"], state.nonce.to_string());
    }

    #[test]
    fn test_verify_accepts_percent_encoded() {
        let signer = signer();
        let state = signer.issue(None);
        let encoded = urlencoding::encode(&StateSigner::encode(&state)).into_owned();

        let verified = signer.verify(&encoded).unwrap();
        assert_eq!(verified.user_id, None);
    }

    #[test]
    fn test_nonces_are_unique() {
        let signer = signer();
        assert_ne!(signer.issue(None).nonce, signer.issue(None).nonce);
    }

    #[test]
    fn test_tampered_user_is_rejected() {
        let signer = signer();
        let mut state = signer.issue(Some("u1"));
        state.user_id = Some("u2".to_string());

        assert_eq!(
            signer.verify(&StateSigner::encode(&state)),
            Err(StateError::InvalidSignature)
        );
    }

    #[test]
    fn test_other_secret_is_rejected() {
        let state = signer().issue(Some("u1"));
        let other = StateSigner::new(
            SecretString::from("fedcba9876543210fedcba9876543210"),
            Duration::from_secs(600),
        );

        assert_eq!(
            other.verify(&StateSigner::encode(&state)),
            Err(StateError::InvalidSignature)
        );
    }

    #[test]
    fn test_expired_state() {
        let signer = signer();
        let state = signer.issue_at(Some("u1"), 1_000);
        let encoded = StateSigner::encode(&state);

        assert!(signer.verify_at(&encoded, 1_600).is_ok());
        assert_eq!(signer.verify_at(&encoded, 1_601), Err(StateError::Expired));
        assert!(signer.verify_at(&encoded, 950).is_ok());
        assert_eq!(signer.verify_at(&encoded, 900), Err(StateError::Expired));
    }

    #[test]
    fn test_malformed_state() {
        let signer = signer();
        assert!(matches!(signer.verify(""), Err(StateError::Malformed(_))));
        assert!(matches!(
            signer.verify("not json"),
            Err(StateError::Malformed(_))
        ));
        assert!(matches!(
            signer.verify(r#"{"user_id":"u1"}"#),
            Err(StateError::Malformed(_))
        ));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let debug = format!("{:?}", signer());
        assert!(!debug.contains("0123456789abcdef"));
    }
}
