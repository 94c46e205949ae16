//! `orders/create` webhook payload and its mapping onto an order row.

use callpilot_core::{ShopId, UserId, parse_amount};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::models::NewOrder;

/// Status every freshly ingested order starts in.
pub const INITIAL_ORDER_STATUS: &str = "pending";
const DEFAULT_PAYMENT_STATUS: &str = "pending";
const DEFAULT_SHIPPING_STATUS: &str = "unfulfilled";
const DEFAULT_PAYMENT_METHOD: &str = "unknown";
const UNKNOWN_CUSTOMER: &str = "Unknown";

/// Errors that make a payload unusable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    /// The body is not a JSON object of the expected shape.
    #[error("invalid order payload: {0}")]
    Invalid(String),

    /// The order has no usable `id`.
    #[error("order payload has no id")]
    MissingId,
}

/// The subset of a Shopify order this service stores.
///
/// Only `id` is required; everything else falls back to a default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderPayload {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub order_number: Value,
    pub name: Option<String>,
    pub customer: Option<CustomerPayload>,
    pub shipping_address: Option<AddressPayload>,
    pub billing_address: Option<AddressPayload>,
    #[serde(default)]
    pub total_price: Value,
    pub currency: Option<String>,
    pub financial_status: Option<String>,
    pub fulfillment_status: Option<String>,
    pub payment_gateway_names: Option<Vec<String>>,
    pub created_at: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomerPayload {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AddressPayload {
    pub phone: Option<String>,
    pub country_code: Option<String>,
}

impl OrderPayload {
    /// Parse a raw webhook body.
    ///
    /// # Errors
    ///
    /// Returns `PayloadError::Invalid` if the body is not a JSON order object.
    pub fn from_slice(body: &[u8]) -> Result<Self, PayloadError> {
        serde_json::from_slice(body).map_err(|e| PayloadError::Invalid(e.to_string()))
    }

    /// Shopify's order id as stored in `shopify_order_id`.
    ///
    /// # Errors
    ///
    /// Returns `PayloadError::MissingId` if `id` is absent, null or empty.
    pub fn order_id(&self) -> Result<String, PayloadError> {
        scalar_to_string(&self.id).ok_or(PayloadError::MissingId)
    }

    /// Map the payload onto an order row for `shop_id`.
    ///
    /// Empty strings count as absent everywhere.
    ///
    /// # Errors
    ///
    /// Returns `PayloadError::MissingId` if the order has no id.
    pub fn into_new_order(
        self,
        user_id: Option<UserId>,
        shop_id: ShopId,
        default_currency: &str,
    ) -> Result<NewOrder, PayloadError> {
        let shopify_order_id = self.order_id()?;
        let order_number = scalar_to_string(&self.order_number)
            .or_else(|| {
                non_empty(self.name.as_deref()).map(|n| n.trim_start_matches('#').to_string())
            })
            .unwrap_or_else(|| shopify_order_id.clone());

        let customer = self.customer.unwrap_or_default();
        let shipping = self.shipping_address.unwrap_or_default();
        let billing = self.billing_address.unwrap_or_default();

        let customer_name = format!(
            "{} {}",
            non_empty(customer.first_name.as_deref()).unwrap_or_default(),
            non_empty(customer.last_name.as_deref()).unwrap_or_default()
        )
        .trim()
        .to_string();

        let customer_phone = first_present(&[
            customer.phone.as_deref(),
            shipping.phone.as_deref(),
            billing.phone.as_deref(),
        ]);
        let country_code =
            first_present(&[shipping.country_code.as_deref(), billing.country_code.as_deref()]);

        let payment_method = self
            .payment_gateway_names
            .as_ref()
            .and_then(|names| names.first())
            .and_then(|name| non_empty(Some(name.as_str())))
            .unwrap_or(DEFAULT_PAYMENT_METHOD)
            .to_string();

        let placed_at = self
            .created_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(NewOrder {
            user_id,
            shop_id,
            shopify_order_id,
            order_number,
            customer_name: if customer_name.is_empty() {
                UNKNOWN_CUSTOMER.to_string()
            } else {
                customer_name
            },
            customer_phone,
            customer_email: first_present(&[customer.email.as_deref()]),
            total_amount: parse_amount(&self.total_price),
            currency: or_default(self.currency.as_deref(), default_currency),
            order_status: INITIAL_ORDER_STATUS.to_string(),
            payment_status: or_default(self.financial_status.as_deref(), DEFAULT_PAYMENT_STATUS),
            shipping_status: or_default(
                self.fulfillment_status.as_deref(),
                DEFAULT_SHIPPING_STATUS,
            ),
            payment_method,
            country_code,
            placed_at,
            notes: first_present(&[self.note.as_deref()]),
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.trim().is_empty())
}

fn first_present(candidates: &[Option<&str>]) -> Option<String> {
    candidates
        .iter()
        .find_map(|c| non_empty(*c))
        .map(str::to_string)
}

fn or_default(value: Option<&str>, default: &str) -> String {
    non_empty(value).unwrap_or(default).to_string()
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}
