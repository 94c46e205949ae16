//! CLI command implementations.

pub mod migrate;
pub mod webhooks;

use callpilot_ingest::config::ConfigError;
use callpilot_ingest::db::RepositoryError;
use callpilot_ingest::shopify::ShopifyError;
use secrecy::SecretString;
use thiserror::Error;

/// Environment variable holding the ingest database URL.
pub const DATABASE_URL_VAR: &str = "INGEST_DATABASE_URL";

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    /// Service configuration is incomplete or invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Database connection error.
    #[error("Database connection error: {0}")]
    Database(#[from] sqlx::Error),

    /// A migration failed to apply.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Reading or writing registrations failed.
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// The Shopify client could not be built.
    #[error("Shopify error: {0}")]
    Shopify(#[from] ShopifyError),

    /// `--shop` is not a `*.myshopify.com` domain.
    #[error("Invalid shop domain: {0}")]
    InvalidShop(String),

    /// `--shop` has no stored credential.
    #[error("No stored credential for {0}")]
    UnknownShop(String),
}

/// Read the ingest database URL from the environment, falling back to `DATABASE_URL`.
fn database_url() -> Result<SecretString, CommandError> {
    dotenvy::dotenv().ok();

    std::env::var(DATABASE_URL_VAR)
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map(SecretString::from)
        .map_err(|_| CommandError::MissingEnvVar(DATABASE_URL_VAR))
}
