//! Shopify shop domain type.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Suffix every Shopify-assigned shop hostname carries.
pub const SHOPIFY_DOMAIN_SUFFIX: &str = ".myshopify.com";

/// Errors that can occur when parsing a [`ShopDomain`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ShopDomainError {
    /// The input string is empty.
    #[error("shop domain cannot be empty")]
    Empty,
    /// The input string is too long.
    #[error("shop domain must be at most {max} characters")]
    TooLong {
        /// Maximum allowed length.
        max: usize,
    },
    /// The host does not end in `.myshopify.com`.
    #[error("shop domain must end with {SHOPIFY_DOMAIN_SUFFIX}")]
    NotShopify,
    /// The shop handle (the part before the suffix) is malformed.
    #[error("invalid shop handle: {0}")]
    InvalidHandle(String),
}

/// A normalized Shopify shop domain, e.g. `demo.myshopify.com`.
///
/// This is the single identifier used to key both the credential table and
/// the connected-shop table, so every value that reaches storage goes through
/// the same normalization.
///
/// ## Normalization
///
/// - Surrounding whitespace is trimmed and the value is lowercased
/// - A leading `http://` or `https://` and trailing `/` are stripped
///
/// ## Constraints
///
/// - Must end with `.myshopify.com`
/// - The handle before the suffix contains only `a-z`, `0-9` and `-`,
///   and neither starts nor ends with `-`
///
/// ## Examples
///
/// ```
/// use callpilot_core::ShopDomain;
///
/// let shop = ShopDomain::parse(" https://Demo.myshopify.com/ ").unwrap();
/// assert_eq!(shop.as_str(), "demo.myshopify.com");
/// assert_eq!(shop.store_url(), "https://demo.myshopify.com");
///
/// assert!(ShopDomain::parse("").is_err());
/// assert!(ShopDomain::parse("evil.example.com").is_err());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct ShopDomain(String);

impl ShopDomain {
    /// Maximum length of a hostname.
    pub const MAX_LENGTH: usize = 255;

    /// Parse and normalize a `ShopDomain`.
    ///
    /// # Errors
    ///
    /// Returns an error if the normalized input is empty, too long, not a
    /// `myshopify.com` host, or has a malformed handle.
    pub fn parse(s: &str) -> Result<Self, ShopDomainError> {
        let lowered = s.trim().to_ascii_lowercase();
        let without_scheme = lowered
            .strip_prefix("https://")
            .or_else(|| lowered.strip_prefix("http://"))
            .unwrap_or(&lowered);
        let host = without_scheme.trim_end_matches('/');

        if host.is_empty() {
            return Err(ShopDomainError::Empty);
        }

        if host.len() > Self::MAX_LENGTH {
            return Err(ShopDomainError::TooLong {
                max: Self::MAX_LENGTH,
            });
        }

        let handle = host
            .strip_suffix(SHOPIFY_DOMAIN_SUFFIX)
            .ok_or(ShopDomainError::NotShopify)?;

        let valid_chars = handle
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if handle.is_empty()
            || !valid_chars
            || handle.starts_with('-')
            || handle.ends_with('-')
        {
            return Err(ShopDomainError::InvalidHandle(handle.to_owned()));
        }

        Ok(Self(host.to_owned()))
    }

    /// Returns the domain as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the `ShopDomain` and returns its inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }

    /// Returns the shop handle (the domain without `.myshopify.com`).
    #[must_use]
    pub fn handle(&self) -> &str {
        self.0
            .strip_suffix(SHOPIFY_DOMAIN_SUFFIX)
            .unwrap_or(&self.0)
    }

    /// Returns the storefront URL stored alongside the shop (`https://{domain}`).
    #[must_use]
    pub fn store_url(&self) -> String {
        format!("https://{}", self.0)
    }

    /// Derive a human-readable shop name from the domain.
    ///
    /// Strips the platform suffix, turns `-` into spaces and upper-cases the
    /// first letter of every word: `my-cool-shop.myshopify.com` becomes
    /// `My Cool Shop`.
    #[must_use]
    pub fn display_name(&self) -> String {
        self.handle()
            .split('-')
            .map(capitalize)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

impl fmt::Display for ShopDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ShopDomain {
    type Err = ShopDomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ShopDomain {
    type Error = ShopDomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ShopDomain> for String {
    fn from(domain: ShopDomain) -> Self {
        domain.0
    }
}

impl AsRef<str> for ShopDomain {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_domain() {
        let shop = ShopDomain::parse("demo.myshopify.com").unwrap();
        assert_eq!(shop.as_str(), "demo.myshopify.com");
        assert_eq!(shop.handle(), "demo");
    }

    #[test]
    fn test_parse_normalizes_case_scheme_and_slash() {
        let shop = ShopDomain::parse("  HTTPS://My-Cool-Shop.MyShopify.com/ ").unwrap();
        assert_eq!(shop.as_str(), "my-cool-shop.myshopify.com");
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert_eq!(ShopDomain::parse("   "), Err(ShopDomainError::Empty));
        assert_eq!(ShopDomain::parse("https://"), Err(ShopDomainError::Empty));
    }

    #[test]
    fn test_parse_rejects_foreign_host() {
        assert_eq!(
            ShopDomain::parse("shop.example.com"),
            Err(ShopDomainError::NotShopify)
        );
        assert_eq!(
            ShopDomain::parse("demo.myshopify.com.evil.io"),
            Err(ShopDomainError::NotShopify)
        );
    }

    #[test]
    fn test_parse_rejects_bad_handle() {
        assert!(matches!(
            ShopDomain::parse(".myshopify.com"),
            Err(ShopDomainError::InvalidHandle(_))
        ));
        assert!(matches!(
            ShopDomain::parse("-demo.myshopify.com"),
            Err(ShopDomainError::InvalidHandle(_))
        ));
        assert!(matches!(
            ShopDomain::parse("a.b.myshopify.com"),
            Err(ShopDomainError::InvalidHandle(_))
        ));
        assert!(matches!(
            ShopDomain::parse("shop?x=1.myshopify.com"),
            Err(ShopDomainError::InvalidHandle(_))
        ));
    }

    #[test]
    fn test_parse_rejects_too_long() {
        let long = format!("{}.myshopify.com", "a".repeat(300));
        assert!(matches!(
            ShopDomain::parse(&long),
            Err(ShopDomainError::TooLong { .. })
        ));
    }

    #[test]
    fn test_display_name_multi_word() {
        let shop = ShopDomain::parse("my-cool-shop.myshopify.com").unwrap();
        assert_eq!(shop.display_name(), "My Cool Shop");
    }

    #[test]
    fn test_display_name_single_word() {
        let shop = ShopDomain::parse("demo.myshopify.com").unwrap();
        assert_eq!(shop.display_name(), "Demo");
    }

    #[test]
    fn test_display_name_keeps_digits() {
        let shop = ShopDomain::parse("shop-2go.myshopify.com").unwrap();
        assert_eq!(shop.display_name(), "Shop 2go");
    }

    #[test]
    fn test_store_url() {
        let shop = ShopDomain::parse("demo.myshopify.com").unwrap();
        assert_eq!(shop.store_url(), "https://demo.myshopify.com");
    }

    #[test]
    fn test_serde_validates() {
        let shop: ShopDomain = serde_json::from_str("\"Demo.myshopify.com\"").unwrap();
        assert_eq!(shop.as_str(), "demo.myshopify.com");
        assert!(serde_json::from_str::<ShopDomain>("\"nope\"").is_err());
    }
}
