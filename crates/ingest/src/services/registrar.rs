//! `orders/create` webhook subscription with recorded, retried outcomes.
//!
//! The callback registers inline; when Shopify refuses or is unreachable the
//! failure is stored in `webhook_registrations` and picked up by
//! [`WebhookRegistrar::run`] with exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use callpilot_core::ShopDomain;
use chrono::Utc;
use secrecy::SecretString;
use tokio::sync::watch;
use tracing::instrument;

use crate::config::RegistrationConfig;
use crate::db::{RepositoryError, Store};
use crate::models::{ORDERS_CREATE_TOPIC, RegistrationStatus, WebhookRegistration};
use crate::shopify::{ShopifyApi, ShopifyError, WebhookRequest};

const BASE_BACKOFF_SECS: u64 = 30;
const MAX_BACKOFF_SECS: u64 = 3600;
/// Registrations handled per worker tick.
const BATCH_SIZE: i64 = 50;

/// Delay before the next attempt after `attempts` failed ones.
///
/// `30s * 2^(attempts - 1)`, capped at one hour.
#[must_use]
pub fn backoff(attempts: i32) -> Duration {
    let exponent = u32::try_from(attempts.saturating_sub(1).max(0)).unwrap_or(0);
    let secs = 2_u64
        .checked_pow(exponent)
        .and_then(|factor| factor.checked_mul(BASE_BACKOFF_SECS))
        .map_or(MAX_BACKOFF_SECS, |secs| secs.min(MAX_BACKOFF_SECS));
    Duration::from_secs(secs)
}

/// Counts from one pass over due registrations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetrySummary {
    pub registered: usize,
    pub failed: usize,
    /// Rows dropped because the shop's credential no longer exists.
    pub dropped: usize,
}

/// Registers the ingestion webhook and records every outcome.
#[derive(Clone)]
pub struct WebhookRegistrar {
    store: Arc<dyn Store>,
    shopify: Arc<dyn ShopifyApi>,
    address: String,
    policy: RegistrationConfig,
}

impl WebhookRegistrar {
    /// Create a registrar subscribing shops to `address`.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        shopify: Arc<dyn ShopifyApi>,
        address: String,
        policy: RegistrationConfig,
    ) -> Self {
        Self {
            store,
            shopify,
            address,
            policy,
        }
    }

    /// The subscription this registrar asks Shopify for.
    #[must_use]
    pub fn request(&self) -> WebhookRequest {
        WebhookRequest::json(ORDERS_CREATE_TOPIC, &self.address)
    }

    /// Attempt the subscription now and store the outcome.
    ///
    /// `previous_attempts` is the number of failed attempts already recorded
    /// (0 for a fresh connection). A Shopify failure is not an error here: it
    /// is recorded as [`RegistrationStatus::Failed`] with the next attempt time.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the outcome cannot be stored.
    #[instrument(skip(self, shop_domain, access_token), fields(shop = %shop_domain))]
    pub async fn register(
        &self,
        shop_domain: &ShopDomain,
        access_token: &SecretString,
        previous_attempts: i32,
    ) -> Result<WebhookRegistration, RepositoryError> {
        let request = self.request();
        let now = Utc::now();
        let attempts = previous_attempts.saturating_add(1);

        let registration = match self
            .shopify
            .register_webhook(shop_domain, access_token, &request)
            .await
        {
            Ok(subscription) => {
                tracing::info!(
                    webhook_id = ?subscription.id,
                    already_registered = subscription.already_registered,
                    "Webhook registered"
                );
                WebhookRegistration {
                    shop_domain: shop_domain.clone(),
                    topic: request.topic,
                    address: request.address,
                    status: RegistrationStatus::Registered,
                    attempts,
                    last_error: None,
                    provider_webhook_id: subscription.id,
                    next_attempt_at: now,
                    updated_at: now,
                }
            }
            Err(e) => {
                let delay = retry_delay(&e, attempts);
                tracing::warn!(
                    error = %e,
                    attempts,
                    retry_in_secs = delay.as_secs(),
                    "Webhook registration failed"
                );
                WebhookRegistration {
                    shop_domain: shop_domain.clone(),
                    topic: request.topic,
                    address: request.address,
                    status: RegistrationStatus::Failed,
                    attempts,
                    last_error: Some(e.to_string()),
                    provider_webhook_id: None,
                    next_attempt_at: now
                        + chrono::Duration::from_std(delay)
                            .unwrap_or_else(|_| chrono::Duration::hours(1)),
                    updated_at: now,
                }
            }
        };

        self.store.save_registration(&registration).await?;
        Ok(registration)
    }

    /// Retry every registration that is due now.
    ///
    /// A shop whose outcome cannot be stored is logged and counted as failed;
    /// the rest of the batch still runs.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the due registrations cannot be loaded.
    pub async fn retry_due(&self) -> Result<RetrySummary, RepositoryError> {
        let due = self
            .store
            .due_registrations(Utc::now(), self.policy.max_attempts, BATCH_SIZE)
            .await?;

        let mut summary = RetrySummary::default();
        for registration in due {
            match self
                .retry_one(&registration.shop_domain, registration.attempts)
                .await
            {
                Ok(Some(outcome)) if outcome.status == RegistrationStatus::Registered => {
                    summary.registered += 1;
                }
                Ok(Some(_)) => summary.failed += 1,
                Ok(None) => summary.dropped += 1,
                Err(e) => {
                    tracing::error!(
                        shop = %registration.shop_domain,
                        error = %e,
                        "Could not record webhook registration retry"
                    );
                    summary.failed += 1;
                }
            }
        }

        if summary != RetrySummary::default() {
            tracing::info!(
                registered = summary.registered,
                failed = summary.failed,
                dropped = summary.dropped,
                "Webhook registration retry pass complete"
            );
        }

        Ok(summary)
    }

    /// Retry one shop immediately, ignoring backoff and the attempt limit.
    ///
    /// Returns `None` if the shop has no stored credential.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the store cannot be read or written.
    pub async fn retry_shop(
        &self,
        shop_domain: &ShopDomain,
    ) -> Result<Option<WebhookRegistration>, RepositoryError> {
        let previous_attempts = self
            .store
            .find_registration(shop_domain)
            .await?
            .map_or(0, |r| r.attempts);
        self.retry_one(shop_domain, previous_attempts).await
    }

    async fn retry_one(
        &self,
        shop_domain: &ShopDomain,
        previous_attempts: i32,
    ) -> Result<Option<WebhookRegistration>, RepositoryError> {
        let Some(credential) = self.store.find_credential(shop_domain).await? else {
            tracing::info!(shop = %shop_domain, "Credential gone, dropping webhook registration");
            self.store.delete_registration(shop_domain).await?;
            return Ok(None);
        };

        self.register(shop_domain, &credential.access_token, previous_attempts)
            .await
            .map(Some)
    }

    /// Retry due registrations every `retry_interval` until `shutdown` flips to `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.policy.retry_interval);
        tracing::info!(
            interval_secs = self.policy.retry_interval.as_secs(),
            max_attempts = self.policy.max_attempts,
            "Webhook registration worker started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.retry_due().await {
                        tracing::error!(error = %e, "Webhook registration retry pass failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Webhook registration worker stopped");
    }
}

fn retry_delay(error: &ShopifyError, attempts: i32) -> Duration {
    let delay = backoff(attempts);
    match error {
        ShopifyError::RateLimited(secs) => delay.max(Duration::from_secs(*secs)),
        _ => delay,
    }
}
