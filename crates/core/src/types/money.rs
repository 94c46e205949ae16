//! Monetary amounts as delivered by Shopify webhooks.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::Value;

/// Currency code used when a payload carries none.
pub const DEFAULT_CURRENCY: &str = "RON";

/// Parse a provider amount into a [`Decimal`].
///
/// Shopify sends prices as decimal strings (`"199.99"`), but numbers are
/// accepted too. Anything else, including an absent field or an unparsable
/// string, yields zero.
#[must_use]
pub fn parse_amount(value: &Value) -> Decimal {
    match value {
        Value::String(s) => parse_decimal_str(s),
        Value::Number(n) => parse_decimal_str(&n.to_string()),
        _ => Decimal::ZERO,
    }
}

fn parse_decimal_str(s: &str) -> Decimal {
    let trimmed = s.trim();
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .unwrap_or(Decimal::ZERO)
}
