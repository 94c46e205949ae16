//! Callpilot ingest library.
//!
//! Connects merchants' Shopify stores through OAuth and ingests their
//! `orders/create` webhooks into the dashboard database.
//!
//! # Security
//!
//! This crate holds HIGH PRIVILEGE material:
//! - Offline Shopify Admin API tokens for every connected store
//! - The Shopify client secret used to verify callbacks and webhooks
//!
//! Tokens are wrapped in `SecretString` and never logged.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod shopify;
pub mod state;

pub use routes::router;
pub use state::AppState;
