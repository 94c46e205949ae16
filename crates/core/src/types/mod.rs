//! Core types for Callpilot.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod id;
pub mod money;
pub mod shop_domain;
pub mod user_id;

pub use id::*;
pub use money::{DEFAULT_CURRENCY, parse_amount};
pub use shop_domain::{ShopDomain, ShopDomainError};
pub use user_id::{UserId, UserIdError};
