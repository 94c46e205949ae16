//! Database migration command.
//!
//! # Usage
//!
//! ```bash
//! cp-cli migrate
//! ```
//!
//! # Environment Variables
//!
//! - `INGEST_DATABASE_URL` - `PostgreSQL` connection string
//!
//! Migrations live in `crates/ingest/migrations/` and are embedded at build time.

use callpilot_ingest::db::create_pool;

use super::{CommandError, database_url};

/// Run the ingest database migrations.
///
/// # Errors
///
/// Returns `CommandError` if the database is unreachable or a migration fails.
pub async fn run() -> Result<(), CommandError> {
    let database_url = database_url()?;

    tracing::info!("Connecting to ingest database...");
    let pool = create_pool(&database_url).await?;

    tracing::info!("Running ingest migrations...");
    sqlx::migrate!("../ingest/migrations").run(&pool).await?;

    tracing::info!("Ingest migrations complete!");
    Ok(())
}
