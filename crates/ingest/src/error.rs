//! Unified error handling for the ingestion service.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::db::RepositoryError;
use crate::shopify::ShopifyError;

/// Application-level error type for HTTP handlers.
///
/// Bodies are plain text: the only clients are Shopify and the merchant's browser.
#[derive(Debug, Error)]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// An ingested order could not be written.
    #[error("Error saving order")]
    OrderNotSaved(#[source] RepositoryError),

    /// Shopify could not be reached or answered unexpectedly.
    #[error("Shopify error: {0}")]
    Shopify(#[from] ShopifyError),

    /// Shopify answered but refused the request; reported to the caller as-is.
    #[error("{0}")]
    UpstreamRejected(String),

    /// Resource not found.
    #[error("{0}")]
    NotFound(String),

    /// Request signature missing or invalid.
    #[error("{0}")]
    Unauthorized(String),

    /// Bad request from client.
    #[error("{0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status this error maps to.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Database(_) | Self::OrderNotSaved(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Shopify(_) => StatusCode::BAD_GATEWAY,
            Self::UpstreamRejected(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log server errors with Sentry
        if matches!(
            self,
            Self::Database(_) | Self::OrderNotSaved(_) | Self::Internal(_) | Self::Shopify(_)
        ) {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                source = ?std::error::Error::source(&self).map(ToString::to_string),
                sentry_event_id = %event_id,
                "Ingest request error"
            );
        } else {
            tracing::warn!(error = %self, status = self.status().as_u16(), "Request rejected");
        }

        let status = self.status();

        // Don't expose internal error details to clients
        let message = match &self {
            Self::Database(_) | Self::Internal(_) => "Internal server error".to_string(),
            Self::Shopify(_) => "External service error".to_string(),
            _ => self.to_string(),
        };

        (status, message).into_response()
    }
}
