//! Callpilot Core - Shared domain types.
//!
//! This crate provides the types shared by the ingestion service and the CLI:
//! - `ingest` - Shopify OAuth + webhook ingestion HTTP service
//! - `cli` - Command-line tools for migrations and webhook maintenance
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no database
//! access, no HTTP clients. This keeps it lightweight and trivially testable.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for shop domains, user ids, row ids and money

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
