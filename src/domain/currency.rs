//! Supported currencies

pub const USD: &str = "USD";
pub const EUR: &str = "EUR";
pub const CAD: &str = "CAD";

/// Returns true if the currency code is accepted for new accounts and transfers
pub fn is_supported_currency(currency: &str) -> bool {
    matches!(currency, USD | EUR | CAD)
}
