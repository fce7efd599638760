use crate::core::currency::{CurrencyCode, RateError, RateTable};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Source of rate tables, usually a remote exchange-rate service.
///
/// A fetch may be slow or fail; callers keep whatever table they already
/// had when it does.
pub trait RateProvider {
    /// Fetch a table anchored to `base`.
    fn fetch_rates(&self, base: &CurrencyCode) -> Result<RateTable, RateError>;
}

/// Serves tables derived from one fixed anchor table.
///
/// Any base present in the anchor can be requested; the table is rebased
/// through cross rates and stamped with the time of the request.
///
/// # Examples
///
/// ```
/// use trip_ledger::core::currency::CurrencyCode;
/// use trip_ledger::rates::provider::{RateProvider, StaticRateProvider};
/// use rust_decimal_macros::dec;
///
/// let provider = StaticRateProvider::from_pairs(
///     CurrencyCode::new("USD"),
///     [(CurrencyCode::new("EUR"), dec!(0.5))],
/// )
/// .unwrap();
///
/// let table = provider.fetch_rates(&CurrencyCode::new("EUR")).unwrap();
/// assert_eq!(table.rate(&CurrencyCode::new("USD")), Some(dec!(2)));
/// ```
#[derive(Debug, Clone)]
pub struct StaticRateProvider {
    anchor: RateTable,
}

impl StaticRateProvider {
    pub fn new(anchor: RateTable) -> Self {
        Self { anchor }
    }

    pub fn from_pairs(
        base: CurrencyCode,
        rates: impl IntoIterator<Item = (CurrencyCode, Decimal)>,
    ) -> Result<Self, RateError> {
        Ok(Self::new(RateTable::from_rates(base, rates, Utc::now())?))
    }

    /// Parse a `{"USD": "1", "EUR": "0.92"}` style map anchored to `base`.
    pub fn from_map(
        base: CurrencyCode,
        rates: &BTreeMap<String, Decimal>,
    ) -> Result<Self, RateError> {
        Self::from_pairs(
            base,
            rates
                .iter()
                .map(|(code, rate)| (CurrencyCode::new(code.to_uppercase()), *rate)),
        )
    }

    pub fn anchor(&self) -> &RateTable {
        &self.anchor
    }
}

impl RateProvider for StaticRateProvider {
    fn fetch_rates(&self, base: &CurrencyCode) -> Result<RateTable, RateError> {
        let table = self.anchor.rebase(base).map_err(|_| RateError::FetchFailed {
            base: base.clone(),
            reason: format!("no rates published for {}", base),
        })?;
        Ok(table.stamped(Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn provider() -> StaticRateProvider {
        StaticRateProvider::from_pairs(
            CurrencyCode::new("USD"),
            [
                (CurrencyCode::new("EUR"), dec!(0.8)),
                (CurrencyCode::new("GBP"), dec!(0.4)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_fetch_anchor_base() {
        let table = provider().fetch_rates(&CurrencyCode::new("USD")).unwrap();
        assert_eq!(table.rate(&CurrencyCode::new("EUR")), Some(dec!(0.8)));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_fetch_rebased() {
        let table = provider().fetch_rates(&CurrencyCode::new("GBP")).unwrap();
        assert_eq!(table.base().as_str(), "GBP");
        assert_eq!(table.rate(&CurrencyCode::new("EUR")), Some(dec!(2)));
        assert_eq!(table.rate(&CurrencyCode::new("USD")), Some(dec!(2.5)));
    }

    #[test]
    fn test_fetch_unknown_base_fails() {
        let err = provider().fetch_rates(&CurrencyCode::new("KRW")).unwrap_err();
        assert!(matches!(err, RateError::FetchFailed { .. }));
    }

    #[test]
    fn test_from_map_uppercases_codes() {
        let mut rates = BTreeMap::new();
        rates.insert("eur".to_string(), dec!(0.9));
        let provider = StaticRateProvider::from_map(CurrencyCode::new("USD"), &rates).unwrap();
        assert!(provider.anchor().contains(&CurrencyCode::new("EUR")));
    }
}
