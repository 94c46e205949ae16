//! Business logic shared by the HTTP handlers, the background worker and the CLI.

pub mod oauth_state;
pub mod registrar;

pub use oauth_state::{OAuthState, StateError, StateSigner};
pub use registrar::{RetrySummary, WebhookRegistrar};
