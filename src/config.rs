use crate::core::currency::CurrencyCode;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Numeric policy shared by every ledger computation.
///
/// The aggregator, solver and statistics all read the same config so that
/// rounding and the zero tolerance agree across a single view.
///
/// # Examples
///
/// ```
/// use trip_ledger::config::LedgerConfig;
/// use rust_decimal_macros::dec;
///
/// let config = LedgerConfig::default();
/// assert_eq!(config.decimal_places, 2);
/// assert_eq!(config.tolerance, dec!(0.005));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Number of decimal places in one minor unit of the base currency.
    pub decimal_places: u32,
    /// Balances within this distance of zero count as settled, and ledger
    /// totals within it count as balanced. The default of half a minor unit
    /// means any non-zero cent is still owed.
    pub tolerance: Decimal,
    /// Base currency used when a trip declares none and has no expenses.
    pub default_currency: CurrencyCode,
}

impl LedgerConfig {
    pub fn with_tolerance(mut self, tolerance: Decimal) -> Self {
        self.tolerance = tolerance;
        self
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            decimal_places: 2,
            tolerance: dec!(0.005),
            default_currency: CurrencyCode::new("USD"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_with_tolerance() {
        let config = LedgerConfig::default().with_tolerance(dec!(0.05));
        assert_eq!(config.tolerance, dec!(0.05));
        assert_eq!(config.decimal_places, 2);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: LedgerConfig = serde_json::from_str(r#"{"tolerance": "0.5"}"#).unwrap();
        assert_eq!(config.tolerance, dec!(0.5));
        assert_eq!(config.decimal_places, 2);
        assert_eq!(config.default_currency.as_str(), "USD");
    }
}
