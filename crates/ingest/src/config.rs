//! Ingestion service configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `DATABASE_URL` - `PostgreSQL` connection string (falls back from `INGEST_DATABASE_URL`)
//! - `PUBLIC_BASE_URL` - Public URL of this service (used for callback and webhook URLs)
//! - `APP_BASE_URL` - Public URL of the dashboard front-end
//! - `SHOPIFY_CLIENT_ID` - Shopify app client ID
//! - `SHOPIFY_CLIENT_SECRET` - Shopify app client secret (also signs webhooks)
//! - `STATE_SECRET` - Key for signing the OAuth `state` blob (min 32 chars, high entropy)
//!
//! ## Optional
//! - `INGEST_HOST` - Bind address (default: 127.0.0.1)
//! - `INGEST_PORT` - Listen port (default: 3002)
//! - `SHOPIFY_API_VERSION` - Admin REST API version (default: 2024-01)
//! - `SHOPIFY_VERIFY_HMAC` - Verify callback and webhook signatures (default: true)
//! - `STATE_TTL_SECS` - Lifetime of an OAuth `state` blob (default: 600)
//! - `DEFAULT_CURRENCY` - Currency for orders that carry none (default: RON)
//! - `REGISTRATION_RETRY_INTERVAL_SECS` - Webhook registration retry tick (default: 60)
//! - `REGISTRATION_MAX_ATTEMPTS` - Give up registering after this many attempts (default: 8)
//! - `SENTRY_DSN` - Sentry error tracking DSN

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use callpilot_core::DEFAULT_CURRENCY;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

const MIN_STATE_SECRET_LENGTH: usize = 32;
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;
const DEFAULT_API_VERSION: &str = "2024-01";

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Ingestion service configuration.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL of this service, without trailing slash
    pub public_base_url: String,
    /// Public base URL of the dashboard front-end, without trailing slash
    pub app_base_url: String,
    /// Shopify app configuration
    pub shopify: ShopifyConfig,
    /// OAuth `state` signing configuration
    pub oauth_state: OAuthStateConfig,
    /// Currency applied to orders whose payload carries none
    pub default_currency: String,
    /// Webhook registration retry policy
    pub registration: RegistrationConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment (e.g., "development", "staging", "production")
    pub sentry_environment: Option<String>,
    /// Sentry error sample rate (0.0 to 1.0)
    pub sentry_sample_rate: f32,
    /// Sentry traces sample rate for performance monitoring (0.0 to 1.0)
    pub sentry_traces_sample_rate: f32,
}

/// Shopify app configuration.
///
/// Implements `Debug` manually to redact the client secret.
#[derive(Clone)]
pub struct ShopifyConfig {
    /// OAuth client ID
    pub client_id: String,
    /// OAuth client secret; also the key Shopify signs callbacks and webhooks with
    pub client_secret: SecretString,
    /// Admin REST API version (e.g., 2024-01)
    pub api_version: String,
    /// Reject callbacks and webhooks without a valid Shopify HMAC
    pub verify_hmac: bool,
}

impl std::fmt::Debug for ShopifyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShopifyConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("api_version", &self.api_version)
            .field("verify_hmac", &self.verify_hmac)
            .finish()
    }
}

/// OAuth `state` signing configuration.
///
/// Implements `Debug` manually to redact the signing key.
#[derive(Clone)]
pub struct OAuthStateConfig {
    /// HMAC key for the `state` blob
    pub secret: SecretString,
    /// How long an issued `state` stays valid
    pub ttl: Duration,
}

impl std::fmt::Debug for OAuthStateConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthStateConfig")
            .field("secret", &"[REDACTED]")
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// Webhook registration retry policy.
#[derive(Debug, Clone, Copy)]
pub struct RegistrationConfig {
    /// How often the background worker looks for due registrations
    pub retry_interval: Duration,
    /// Attempts after which a failed registration is left alone
    pub max_attempts: i32,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(60),
            max_attempts: 8,
        }
    }
}

impl IngestConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("INGEST_DATABASE_URL")?;
        let host = get_env_or_default("INGEST_HOST", "127.0.0.1")
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::InvalidEnvVar("INGEST_HOST".to_string(), e.to_string()))?;
        let port = parse_env("INGEST_PORT", "3002")?;
        let public_base_url = get_base_url("PUBLIC_BASE_URL")?;
        let app_base_url = get_base_url("APP_BASE_URL")?;

        let shopify = ShopifyConfig::from_env()?;
        let oauth_state = OAuthStateConfig::from_env()?;
        let default_currency = get_env_or_default("DEFAULT_CURRENCY", DEFAULT_CURRENCY);
        let registration = RegistrationConfig::from_env()?;

        let sentry_dsn = get_optional_env("SENTRY_DSN");
        let sentry_environment = get_optional_env("SENTRY_ENVIRONMENT");
        let sentry_sample_rate = get_optional_env("SENTRY_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1.0);
        let sentry_traces_sample_rate = get_optional_env("SENTRY_TRACES_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1.0);

        Ok(Self {
            database_url,
            host,
            port,
            public_base_url,
            app_base_url,
            shopify,
            oauth_state,
            default_currency,
            registration,
            sentry_dsn,
            sentry_environment,
            sentry_sample_rate,
            sentry_traces_sample_rate,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// URL Shopify redirects the merchant back to after consent.
    #[must_use]
    pub fn callback_url(&self) -> String {
        format!("{}/shopify/callback", self.public_base_url)
    }

    /// URL Shopify delivers `orders/create` notifications to.
    #[must_use]
    pub fn webhook_url(&self) -> String {
        format!("{}/shopify/webhook", self.public_base_url)
    }

    /// Front-end URL the merchant lands on after a successful connection.
    #[must_use]
    pub fn connected_redirect_url(&self) -> String {
        format!("{}/profile?tab=stores&shopify=connected", self.app_base_url)
    }
}

impl ShopifyConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            client_id: get_required_env("SHOPIFY_CLIENT_ID")?,
            client_secret: get_validated_secret("SHOPIFY_CLIENT_SECRET")?,
            api_version: get_env_or_default("SHOPIFY_API_VERSION", DEFAULT_API_VERSION),
            verify_hmac: parse_env("SHOPIFY_VERIFY_HMAC", "true")?,
        })
    }
}

impl OAuthStateConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let secret = get_validated_secret("STATE_SECRET")?;
        validate_min_length(&secret, "STATE_SECRET")?;
        let ttl_secs: u64 = parse_env("STATE_TTL_SECS", "600")?;

        Ok(Self {
            secret,
            ttl: Duration::from_secs(ttl_secs),
        })
    }
}

impl RegistrationConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let interval_secs: u64 = parse_env("REGISTRATION_RETRY_INTERVAL_SECS", "60")?;
        let max_attempts: i32 = parse_env("REGISTRATION_MAX_ATTEMPTS", "8")?;

        if interval_secs == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "REGISTRATION_RETRY_INTERVAL_SECS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            retry_interval: Duration::from_secs(interval_secs),
            max_attempts,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get database URL with fallback to generic `DATABASE_URL`.
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar("DATABASE_URL".to_string()))
}

/// Get a required absolute http(s) URL with any trailing slash removed.
fn get_base_url(key: &str) -> Result<String, ConfigError> {
    let value = get_required_env(key)?;
    normalize_base_url(&value).map_err(|reason| ConfigError::InvalidEnvVar(key.to_string(), reason))
}

fn normalize_base_url(value: &str) -> Result<String, String> {
    let parsed = url::Url::parse(value).map_err(|e| e.to_string())?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme '{}'", parsed.scheme()));
    }
    Ok(value.trim_end_matches('/').to_string())
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable (or its default) into `T`.
fn parse_env<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env_or_default(key, default)
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Validate that a signing secret meets minimum length requirements.
fn validate_min_length(secret: &SecretString, var_name: &str) -> Result<(), ConfigError> {
    let value = secret.expose_secret();
    if value.len() < MIN_STATE_SECRET_LENGTH {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "must be at least {} characters (got {})",
                MIN_STATE_SECRET_LENGTH,
                value.len()
            ),
        ));
    }
    Ok(())
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}

/// Configuration with fixed, valid values for unit tests.
#[cfg(test)]
pub(crate) fn sample_config() -> IngestConfig {
    IngestConfig {
        database_url: SecretString::from("postgres://localhost/test"),
        host: IpAddr::from([127, 0, 0, 1]),
        port: 3002,
        public_base_url: "https://ingest.example.test".to_string(),
        app_base_url: "http://localhost:5173".to_string(),
        shopify: ShopifyConfig {
            client_id: "test_client_id".to_string(),
            client_secret: SecretString::from("super_secret_client_secret"),
            api_version: DEFAULT_API_VERSION.to_string(),
            verify_hmac: true,
        },
        oauth_state: OAuthStateConfig {
            secret: SecretString::from("k".repeat(32)),
            ttl: Duration::from_secs(600),
        },
        default_currency: DEFAULT_CURRENCY.to_string(),
        registration: RegistrationConfig::default(),
        sentry_dsn: None,
        sentry_environment: None,
        sentry_sample_rate: 1.0,
        sentry_traces_sample_rate: 1.0,
    }
}
