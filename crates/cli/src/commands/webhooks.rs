//! Webhook registration commands.
//!
//! # Usage
//!
//! ```bash
//! # Show the registration state of every connected shop
//! cp-cli webhooks status
//!
//! # Retry every registration that is due now
//! cp-cli webhooks retry
//!
//! # Retry one shop immediately, ignoring backoff
//! cp-cli webhooks retry --shop demo.myshopify.com
//! ```
//!
//! # Environment Variables
//!
//! `status` only needs `INGEST_DATABASE_URL`. `retry` calls Shopify and
//! loads the full ingest configuration (see `IngestConfig::from_env`).

use std::sync::Arc;

use callpilot_core::ShopDomain;
use callpilot_ingest::config::IngestConfig;
use callpilot_ingest::db::{PgStore, Store, create_pool};
use callpilot_ingest::services::WebhookRegistrar;
use callpilot_ingest::shopify::ShopifyClient;

use super::{CommandError, database_url};

/// Log one line per stored registration.
///
/// # Errors
///
/// Returns `CommandError` if the database cannot be read.
pub async fn status() -> Result<(), CommandError> {
    let pool = create_pool(&database_url()?).await?;
    let registrations = PgStore::new(pool).list_registrations().await?;

    if registrations.is_empty() {
        tracing::info!("No webhook registrations recorded");
        return Ok(());
    }

    for r in &registrations {
        tracing::info!(
            shop = %r.shop_domain,
            status = r.status.as_str(),
            attempts = r.attempts,
            next_attempt_at = %r.next_attempt_at,
            last_error = r.last_error.as_deref().unwrap_or("-"),
            "{}",
            r.topic
        );
    }
    tracing::info!(total = registrations.len(), "Webhook registrations listed");

    Ok(())
}

/// Run one retry pass now, or force a single shop.
///
/// # Errors
///
/// Returns `CommandError` if configuration is incomplete, the shop is
/// invalid or unknown, or the database cannot be read or written.
pub async fn retry(shop: Option<&str>) -> Result<(), CommandError> {
    let shop = shop
        .map(|raw| ShopDomain::parse(raw).map_err(|_| CommandError::InvalidShop(raw.to_owned())))
        .transpose()?;

    let config = IngestConfig::from_env()?;
    let pool = create_pool(&config.database_url).await?;
    let registrar = WebhookRegistrar::new(
        Arc::new(PgStore::new(pool)),
        Arc::new(ShopifyClient::new(&config.shopify)?),
        config.webhook_url(),
        config.registration,
    );

    match shop {
        Some(shop) => {
            let outcome = registrar
                .retry_shop(&shop)
                .await?
                .ok_or_else(|| CommandError::UnknownShop(shop.to_string()))?;
            tracing::info!(
                shop = %shop,
                status = outcome.status.as_str(),
                attempts = outcome.attempts,
                last_error = outcome.last_error.as_deref().unwrap_or("-"),
                "Webhook registration retried"
            );
        }
        None => {
            let summary = registrar.retry_due().await?;
            tracing::info!(
                registered = summary.registered,
                failed = summary.failed,
                dropped = summary.dropped,
                "Retry pass finished"
            );
        }
    }

    Ok(())
}
