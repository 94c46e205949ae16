//! Application state shared across handlers.

use std::sync::Arc;

use crate::config::IngestConfig;
use crate::db::Store;
use crate::services::{StateSigner, WebhookRegistrar};
use crate::shopify::ShopifyApi;

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc`. Storage and the Shopify API
/// sit behind traits so tests can swap in in-memory implementations.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: IngestConfig,
    store: Arc<dyn Store>,
    shopify: Arc<dyn ShopifyApi>,
    state_signer: StateSigner,
    registrar: WebhookRegistrar,
}

impl AppState {
    /// Create a new application state.
    ///
    /// # Arguments
    ///
    /// * `config` - Ingestion service configuration
    /// * `store` - Persistence for credentials, shops, orders and registrations
    /// * `shopify` - Shopify Admin API access
    #[must_use]
    pub fn new(config: IngestConfig, store: Arc<dyn Store>, shopify: Arc<dyn ShopifyApi>) -> Self {
        let state_signer = StateSigner::from_config(&config.oauth_state);
        let registrar = WebhookRegistrar::new(
            Arc::clone(&store),
            Arc::clone(&shopify),
            config.webhook_url(),
            config.registration,
        );

        Self {
            inner: Arc::new(AppStateInner {
                config,
                store,
                shopify,
                state_signer,
                registrar,
            }),
        }
    }

    /// Get a reference to the service configuration.
    #[must_use]
    pub fn config(&self) -> &IngestConfig {
        &self.inner.config
    }

    /// Get a reference to the store.
    #[must_use]
    pub fn store(&self) -> &dyn Store {
        self.inner.store.as_ref()
    }

    /// Get a reference to the Shopify API client.
    #[must_use]
    pub fn shopify(&self) -> &dyn ShopifyApi {
        self.inner.shopify.as_ref()
    }

    /// Get a reference to the OAuth state signer.
    #[must_use]
    pub fn state_signer(&self) -> &StateSigner {
        &self.inner.state_signer
    }

    /// Get a reference to the webhook registrar.
    #[must_use]
    pub fn registrar(&self) -> &WebhookRegistrar {
        &self.inner.registrar
    }
}
