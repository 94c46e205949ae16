//! Shopify OAuth install flow.
//!
//! `/shopify/auth` sends the merchant to Shopify's consent screen with a
//! signed `state` carrying the dashboard user. `/shopify/callback` trades the
//! returned code for an offline token, stores the credential and the
//! dashboard shop, then subscribes the shop to `orders/create`.

use axum::{
    extract::{Query, RawQuery, State},
    response::Response,
};
use callpilot_core::{ShopDomain, UserId};
use serde::Deserialize;
use tracing::instrument;

use super::found;
use crate::error::AppError;
use crate::models::ShopConnection;
use crate::services::StateSigner;
use crate::shopify::{OAUTH_SCOPES, authorization_url, hmac::verify_callback_hmac};
use crate::state::AppState;

// =============================================================================
// Types
// =============================================================================

/// Query parameters for starting the install flow.
#[derive(Debug, Deserialize)]
pub struct AuthParams {
    pub shop: Option<String>,
    pub user_id: Option<String>,
}

/// Callback query pairs, decoded once and kept in order for HMAC checking.
struct CallbackQuery {
    pairs: Vec<(String, String)>,
}

impl CallbackQuery {
    fn parse(raw: Option<&str>) -> Self {
        let pairs = raw
            .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        Self { pairs }
    }

    /// First non-empty value for `key`.
    fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, v)| k == key && !v.trim().is_empty())
            .map(|(_, v)| v.as_str())
    }
}

// =============================================================================
// Route Handlers
// =============================================================================

/// Redirect the merchant to Shopify's consent screen.
#[instrument(skip(state, params), fields(shop = ?params.shop))]
pub async fn auth(
    State(state): State<AppState>,
    Query(params): Query<AuthParams>,
) -> Result<Response, AppError> {
    let shop = match params.shop.as_deref().map(str::trim) {
        None | Some("") => return Err(AppError::BadRequest("Missing shop parameter".to_string())),
        Some(raw) => parse_shop(raw)?,
    };

    let user_id = match params.user_id.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            UserId::parse(raw).map_err(|e| AppError::BadRequest(format!("Invalid user_id: {e}")))?,
        ),
    };

    let oauth_state = state
        .state_signer()
        .issue(user_id.as_ref().map(UserId::as_str));
    let config = state.config();
    let url = authorization_url(
        &shop,
        &config.shopify.client_id,
        &config.callback_url(),
        OAUTH_SCOPES,
        &StateSigner::encode(&oauth_state),
    );

    tracing::info!(shop = %shop, user_id = ?user_id, "Starting Shopify OAuth");
    Ok(found(&url))
}

/// Complete the install: exchange the code, persist, subscribe, redirect.
#[instrument(skip(state, raw_query))]
pub async fn callback(
    State(state): State<AppState>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, AppError> {
    let query = CallbackQuery::parse(raw_query.as_deref());

    let (Some(raw_shop), Some(code)) = (query.get("shop"), query.get("code")) else {
        return Err(AppError::BadRequest("Missing parameters".to_string()));
    };
    let shop = parse_shop(raw_shop)?;

    let config = state.config();
    if config.shopify.verify_hmac
        && !verify_callback_hmac(&query.pairs, &config.shopify.client_secret)
    {
        return Err(AppError::Unauthorized("Invalid signature".to_string()));
    }

    let user_id = recover_user_id(&state, query.get("state"));

    let grant = state
        .shopify()
        .exchange_code(&shop, code)
        .await
        .map_err(|e| {
            if e.is_rejection() {
                tracing::warn!(shop = %shop, error = %e, "Shopify refused the token exchange");
                AppError::UpstreamRejected("Failed to get access token".to_string())
            } else {
                AppError::Shopify(e)
            }
        })?;

    let connected = state
        .store()
        .connect_shop(&ShopConnection {
            user_id,
            shop_domain: shop.clone(),
            access_token: grant.access_token.clone(),
            scope: grant.scope,
        })
        .await?;

    tracing::info!(
        shop = %shop,
        shop_id = %connected.id,
        user_id = ?connected.user_id,
        "Shop connected"
    );

    // The outcome is stored either way; only a failed write is worth logging here.
    if let Err(e) = state
        .registrar()
        .register(&shop, &grant.access_token, 0)
        .await
    {
        tracing::error!(shop = %shop, error = %e, "Failed to record webhook registration");
    }

    Ok(found(&config.connected_redirect_url()))
}

// =============================================================================
// Helpers
// =============================================================================

fn parse_shop(raw: &str) -> Result<ShopDomain, AppError> {
    ShopDomain::parse(raw).map_err(|e| {
        tracing::debug!(shop = raw, error = %e, "Rejected shop domain");
        AppError::BadRequest("Invalid shop domain".to_string())
    })
}

/// Read the dashboard user back out of `state`.
///
/// A missing or unverifiable state does not fail the install; the shop is
/// connected without a tenant instead.
fn recover_user_id(state: &AppState, raw: Option<&str>) -> Option<UserId> {
    let Some(raw) = raw else {
        tracing::warn!("OAuth callback without state, connecting without user");
        return None;
    };

    match state.state_signer().verify(raw) {
        Ok(oauth_state) => oauth_state
            .user_id
            .as_deref()
            .and_then(|id| UserId::parse(id).ok()),
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring unusable OAuth state");
            None
        }
    }
}
