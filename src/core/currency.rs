use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// ISO 4217-style currency code.
///
/// Codes are stored as given; callers that accept user input should
/// upper-case them first so `eur` and `EUR` do not become two currencies.
///
/// # Examples
///
/// ```
/// use trip_ledger::core::currency::CurrencyCode;
///
/// let usd = CurrencyCode::new("USD");
/// let eur = CurrencyCode::new("EUR");
/// assert_ne!(usd, eur);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CurrencyCode(String);

impl CurrencyCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CurrencyCode {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Errors arising from rate lookups and rate fetches.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RateError {
    #[error("no rate available for {currency}")]
    RateUnavailable { currency: CurrencyCode },
    #[error("rate must be positive, got {rate} for {currency}")]
    InvalidRate { currency: CurrencyCode, rate: Decimal },
    #[error("rate for base currency {currency} must be 1, got {rate}")]
    BaseRateNotOne { currency: CurrencyCode, rate: Decimal },
    #[error("rate fetch for {base} failed: {reason}")]
    FetchFailed { base: CurrencyCode, reason: String },
}

/// Currency multipliers anchored to one base currency.
///
/// `rate(c)` is the number of units of `c` worth one unit of the base, so
/// the base itself always maps to 1. A currency missing from the table has
/// no rate at all, which is a different state from any numeric rate.
///
/// # Examples
///
/// ```
/// use trip_ledger::core::currency::{CurrencyCode, RateTable};
/// use rust_decimal_macros::dec;
///
/// let mut table = RateTable::new(CurrencyCode::new("USD"));
/// table.insert(CurrencyCode::new("EUR"), dec!(0.9)).unwrap();
///
/// assert_eq!(table.rate(&CurrencyCode::new("USD")), Some(dec!(1)));
/// assert_eq!(table.rate(&CurrencyCode::new("EUR")), Some(dec!(0.9)));
/// assert_eq!(table.rate(&CurrencyCode::new("JPY")), None);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateTable {
    base: CurrencyCode,
    rates: BTreeMap<CurrencyCode, Decimal>,
    fetched_at: DateTime<Utc>,
}

impl RateTable {
    /// An empty table holding only the base rate, stamped now.
    pub fn new(base: CurrencyCode) -> Self {
        Self::with_timestamp(base, Utc::now())
    }

    pub fn with_timestamp(base: CurrencyCode, fetched_at: DateTime<Utc>) -> Self {
        let mut rates = BTreeMap::new();
        rates.insert(base.clone(), Decimal::ONE);
        Self {
            base,
            rates,
            fetched_at,
        }
    }

    /// Build a table from `(currency, rate)` pairs.
    pub fn from_rates(
        base: CurrencyCode,
        rates: impl IntoIterator<Item = (CurrencyCode, Decimal)>,
        fetched_at: DateTime<Utc>,
    ) -> Result<Self, RateError> {
        let mut table = Self::with_timestamp(base, fetched_at);
        for (currency, rate) in rates {
            table.insert(currency, rate)?;
        }
        Ok(table)
    }

    /// Set the multiplier for `currency`. Rates must be positive, and the
    /// base currency can only ever be 1.
    pub fn insert(&mut self, currency: CurrencyCode, rate: Decimal) -> Result<(), RateError> {
        if rate <= Decimal::ZERO {
            return Err(RateError::InvalidRate { currency, rate });
        }
        if currency == self.base && rate != Decimal::ONE {
            return Err(RateError::BaseRateNotOne { currency, rate });
        }
        self.rates.insert(currency, rate);
        Ok(())
    }

    pub fn base(&self) -> &CurrencyCode {
        &self.base
    }

    pub fn rate(&self, currency: &CurrencyCode) -> Option<Decimal> {
        self.rates.get(currency).copied()
    }

    pub fn contains(&self, currency: &CurrencyCode) -> bool {
        self.rates.contains_key(currency)
    }

    pub fn currencies(&self) -> impl Iterator<Item = &CurrencyCode> {
        self.rates.keys()
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    /// The same rates with a new fetch timestamp.
    pub fn stamped(mut self, fetched_at: DateTime<Utc>) -> Self {
        self.fetched_at = fetched_at;
        self
    }

    /// How long ago the table was fetched, relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.fetched_at
    }

    /// Derive the same rates anchored to `new_base` via cross rates.
    ///
    /// `rate'(c) = rate(c) / rate(new_base)`. Fails if `new_base` has no
    /// rate in this table.
    pub fn rebase(&self, new_base: &CurrencyCode) -> Result<RateTable, RateError> {
        if new_base == &self.base {
            return Ok(self.clone());
        }
        let anchor = self
            .rate(new_base)
            .ok_or_else(|| RateError::RateUnavailable {
                currency: new_base.clone(),
            })?;
        let mut table = Self::with_timestamp(new_base.clone(), self.fetched_at);
        for (currency, rate) in &self.rates {
            if currency == new_base {
                continue;
            }
            table.insert(currency.clone(), *rate / anchor)?;
        }
        Ok(table)
    }
}

/// Convert `amount` from `from` into `base` using `table`.
///
/// Same-currency amounts come back untouched without a lookup. Otherwise the
/// amount is divided by the table's multiplier for `from`; when the table is
/// anchored elsewhere the result is carried over to `base` through the
/// anchor. A missing rate is reported, never treated as zero.
///
/// # Examples
///
/// ```
/// use trip_ledger::core::currency::{normalize, CurrencyCode, RateTable};
/// use rust_decimal_macros::dec;
///
/// let usd = CurrencyCode::new("USD");
/// let mut table = RateTable::new(usd.clone());
/// table.insert(CurrencyCode::new("EUR"), dec!(0.8)).unwrap();
///
/// let converted = normalize(dec!(80), &CurrencyCode::new("EUR"), &table, &usd).unwrap();
/// assert_eq!(converted, dec!(100));
/// ```
pub fn normalize(
    amount: Decimal,
    from: &CurrencyCode,
    table: &RateTable,
    base: &CurrencyCode,
) -> Result<Decimal, RateError> {
    if from == base {
        return Ok(amount);
    }
    let from_rate = table.rate(from).ok_or_else(|| RateError::RateUnavailable {
        currency: from.clone(),
    })?;
    let in_anchor = amount / from_rate;
    if table.base() == base {
        return Ok(in_anchor);
    }
    let base_rate = table.rate(base).ok_or_else(|| RateError::RateUnavailable {
        currency: base.clone(),
    })?;
    Ok(in_anchor * base_rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn usd_table() -> RateTable {
        let mut table = RateTable::new(CurrencyCode::new("USD"));
        table.insert(CurrencyCode::new("EUR"), dec!(0.9)).unwrap();
        table.insert(CurrencyCode::new("JPY"), dec!(150)).unwrap();
        table
    }

    #[test]
    fn test_currency_code_equality() {
        assert_eq!(CurrencyCode::new("USD"), CurrencyCode::from("USD"));
    }

    #[test]
    fn test_base_rate_is_one() {
        let table = RateTable::new(CurrencyCode::new("EUR"));
        assert_eq!(table.rate(&CurrencyCode::new("EUR")), Some(Decimal::ONE));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_invalid_rate() {
        let mut table = RateTable::new(CurrencyCode::new("USD"));
        assert!(table.insert(CurrencyCode::new("EUR"), dec!(-0.5)).is_err());
        assert!(table.insert(CurrencyCode::new("EUR"), Decimal::ZERO).is_err());
        assert!(!table.contains(&CurrencyCode::new("EUR")));
    }

    #[test]
    fn test_base_rate_cannot_change() {
        let mut table = RateTable::new(CurrencyCode::new("USD"));
        let err = table.insert(CurrencyCode::new("USD"), dec!(2)).unwrap_err();
        assert!(matches!(err, RateError::BaseRateNotOne { .. }));
    }

    #[test]
    fn test_normalize_identity_without_lookup() {
        let table = RateTable::new(CurrencyCode::new("EUR"));
        let usd = CurrencyCode::new("USD");
        // USD is not in the table but needs no rate to convert to itself.
        assert_eq!(normalize(dec!(42), &usd, &table, &usd).unwrap(), dec!(42));
    }

    #[test]
    fn test_normalize_divides_by_rate() {
        let table = usd_table();
        let usd = CurrencyCode::new("USD");
        let result = normalize(dec!(300), &CurrencyCode::new("JPY"), &table, &usd).unwrap();
        assert_eq!(result, dec!(2));
    }

    #[test]
    fn test_normalize_unavailable() {
        let table = usd_table();
        let err = normalize(
            dec!(10),
            &CurrencyCode::new("GBP"),
            &table,
            &CurrencyCode::new("USD"),
        )
        .unwrap_err();
        assert_eq!(
            err,
            RateError::RateUnavailable {
                currency: CurrencyCode::new("GBP")
            }
        );
    }

    #[test]
    fn test_normalize_through_foreign_anchor() {
        let table = usd_table();
        // 150 JPY = 1 USD = 0.9 EUR
        let result = normalize(
            dec!(150),
            &CurrencyCode::new("JPY"),
            &table,
            &CurrencyCode::new("EUR"),
        )
        .unwrap();
        assert_eq!(result, dec!(0.9));
    }

    #[test]
    fn test_rebase() {
        let table = usd_table().rebase(&CurrencyCode::new("EUR")).unwrap();
        assert_eq!(table.base().as_str(), "EUR");
        assert_eq!(table.rate(&CurrencyCode::new("EUR")), Some(Decimal::ONE));
        assert_eq!(table.rate(&CurrencyCode::new("USD")), Some(Decimal::ONE / dec!(0.9)));
        assert_eq!(table.rate(&CurrencyCode::new("JPY")), Some(dec!(150) / dec!(0.9)));
    }

    #[test]
    fn test_rebase_unknown_base() {
        assert!(usd_table().rebase(&CurrencyCode::new("CHF")).is_err());
    }

    #[test]
    fn test_age() {
        let fetched = Utc::now() - Duration::minutes(30);
        let table = RateTable::with_timestamp(CurrencyCode::new("USD"), fetched);
        assert!(table.age(Utc::now()) >= Duration::minutes(30));
    }
}
