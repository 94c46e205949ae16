//! Callpilot CLI - Database migrations and webhook management tools.
//!
//! # Usage
//!
//! ```bash
//! # Run ingest database migrations
//! cp-cli migrate
//!
//! # Show webhook registration state per shop
//! cp-cli webhooks status
//!
//! # Retry failed webhook registrations now
//! cp-cli webhooks retry [--shop demo.myshopify.com]
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `webhooks status` - List webhook registrations
//! - `webhooks retry` - Retry due (or one shop's) webhook registrations

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Debug, Parser)]
#[command(name = "cp-cli")]
#[command(author, version, about = "Callpilot CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Inspect and retry Shopify webhook registrations
    Webhooks {
        #[command(subcommand)]
        action: WebhookAction,
    },
}

#[derive(Debug, Subcommand)]
enum WebhookAction {
    /// List registration state for every shop
    Status,
    /// Retry registrations that are due
    Retry {
        /// Retry only this shop, ignoring backoff and the attempt limit
        #[arg(short, long)]
        shop: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), commands::CommandError> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Webhooks { action } => match action {
            WebhookAction::Status => commands::webhooks::status().await?,
            WebhookAction::Retry { shop } => commands::webhooks::retry(shop.as_deref()).await?,
        },
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_migrate() {
        let cli = Cli::try_parse_from(["cp-cli", "migrate"]).unwrap();
        assert!(matches!(cli.command, Commands::Migrate));
    }

    #[test]
    fn test_parse_webhooks_retry_with_shop() {
        let cli =
            Cli::try_parse_from(["cp-cli", "webhooks", "retry", "--shop", "demo.myshopify.com"])
                .unwrap();
        match cli.command {
            Commands::Webhooks {
                action: WebhookAction::Retry { shop },
            } => assert_eq!(shop.as_deref(), Some("demo.myshopify.com")),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_webhooks_retry_all() {
        let cli = Cli::try_parse_from(["cp-cli", "webhooks", "retry"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Webhooks {
                action: WebhookAction::Retry { shop: None }
            }
        ));
    }

    #[test]
    fn test_webhooks_requires_action() {
        assert!(Cli::try_parse_from(["cp-cli", "webhooks"]).is_err());
    }
}
