use crate::core::currency::{CurrencyCode, RateError, RateTable};
use crate::rates::provider::RateProvider;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};

/// Handle for one in-flight rate fetch.
///
/// Tickets are numbered in the order fetches were started; only a fetch
/// newer than the table currently in effect may replace it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    seq: u64,
    base: CurrencyCode,
}

impl FetchTicket {
    pub fn base(&self) -> &CurrencyCode {
        &self.base
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// What happened to a completed fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// The fetched table is now in effect.
    Applied,
    /// A newer fetch already landed; this result was dropped.
    Superseded,
    /// The fetch failed; the previous table (if any) stays in effect.
    Failed(RateError),
}

/// Owner of the rate table currently in effect.
///
/// Every computation reads the table through here and receives it by
/// reference, so replacing it is a single assignment. Fetches are
/// sequenced with [`FetchTicket`]s: a slow fetch that completes after a
/// newer one has been applied is discarded instead of overwriting it.
///
/// Staleness is reported, not enforced.
#[derive(Debug, Clone, Default)]
pub struct RateBook {
    current: Option<RateTable>,
    issued: u64,
    applied: u64,
    warning: Option<RateError>,
}

impl RateBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a table already in effect.
    pub fn with_table(table: RateTable) -> Self {
        Self {
            current: Some(table),
            ..Self::default()
        }
    }

    pub fn current(&self) -> Option<&RateTable> {
        self.current.as_ref()
    }

    /// The last fetch failure, cleared once a fetch succeeds.
    pub fn warning(&self) -> Option<&RateError> {
        self.warning.as_ref()
    }

    /// Register a fetch for `base` and hand out its ticket.
    pub fn begin_fetch(&mut self, base: &CurrencyCode) -> FetchTicket {
        self.issued += 1;
        debug!("rate fetch #{} for {} started", self.issued, base);
        FetchTicket {
            seq: self.issued,
            base: base.clone(),
        }
    }

    /// Record the result of the fetch identified by `ticket`.
    pub fn complete(
        &mut self,
        ticket: FetchTicket,
        result: Result<RateTable, RateError>,
    ) -> FetchOutcome {
        if ticket.seq <= self.applied {
            debug!(
                "rate fetch #{} for {} superseded by #{}",
                ticket.seq, ticket.base, self.applied
            );
            return FetchOutcome::Superseded;
        }

        let result = result.and_then(|table| {
            if table.base() == &ticket.base {
                Ok(table)
            } else {
                Err(RateError::FetchFailed {
                    base: ticket.base.clone(),
                    reason: format!("provider answered with {} rates", table.base()),
                })
            }
        });

        match result {
            Ok(table) => {
                info!(
                    "rate table for {} applied ({} currencies)",
                    table.base(),
                    table.len()
                );
                self.applied = ticket.seq;
                self.current = Some(table);
                self.warning = None;
                FetchOutcome::Applied
            }
            Err(err) => {
                warn!("{}; keeping previous rates", err);
                self.warning = Some(err.clone());
                FetchOutcome::Failed(err)
            }
        }
    }

    /// Fetch synchronously from `provider` and record the result.
    pub fn refresh(&mut self, provider: &dyn RateProvider, base: &CurrencyCode) -> FetchOutcome {
        let ticket = self.begin_fetch(base);
        let result = provider.fetch_rates(base);
        self.complete(ticket, result)
    }

    /// Age of the table in effect, if any.
    pub fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.current.as_ref().map(|t| t.age(now))
    }

    /// True when there is no table or it is older than `max_age`.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.age(now).map_or(true, |age| age > max_age)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rates::provider::StaticRateProvider;
    use rust_decimal_macros::dec;

    struct FailingProvider;

    impl RateProvider for FailingProvider {
        fn fetch_rates(&self, base: &CurrencyCode) -> Result<RateTable, RateError> {
            Err(RateError::FetchFailed {
                base: base.clone(),
                reason: "connection reset".to_string(),
            })
        }
    }

    fn table(base: &str) -> RateTable {
        RateTable::new(CurrencyCode::new(base))
    }

    #[test]
    fn test_refresh_applies_table() {
        let provider =
            StaticRateProvider::from_pairs(CurrencyCode::new("USD"), [(CurrencyCode::new("EUR"), dec!(0.9))])
                .unwrap();
        let mut book = RateBook::new();
        assert_eq!(book.refresh(&provider, &CurrencyCode::new("EUR")), FetchOutcome::Applied);
        assert_eq!(book.current().unwrap().base().as_str(), "EUR");
    }

    #[test]
    fn test_failure_keeps_previous_table() {
        let mut book = RateBook::with_table(table("USD"));
        let outcome = book.refresh(&FailingProvider, &CurrencyCode::new("EUR"));
        assert!(matches!(outcome, FetchOutcome::Failed(_)));
        assert_eq!(book.current().unwrap().base().as_str(), "USD");
        assert!(book.warning().is_some());
    }

    #[test]
    fn test_late_older_fetch_is_discarded() {
        let mut book = RateBook::new();
        let eur = book.begin_fetch(&CurrencyCode::new("EUR"));
        let gbp = book.begin_fetch(&CurrencyCode::new("GBP"));

        assert_eq!(book.complete(gbp, Ok(table("GBP"))), FetchOutcome::Applied);
        assert_eq!(book.complete(eur, Ok(table("EUR"))), FetchOutcome::Superseded);
        assert_eq!(book.current().unwrap().base().as_str(), "GBP");
    }

    #[test]
    fn test_older_fetch_applies_until_newer_lands() {
        let mut book = RateBook::new();
        let eur = book.begin_fetch(&CurrencyCode::new("EUR"));
        let gbp = book.begin_fetch(&CurrencyCode::new("GBP"));

        assert_eq!(book.complete(eur, Ok(table("EUR"))), FetchOutcome::Applied);
        assert_eq!(book.complete(gbp, Ok(table("GBP"))), FetchOutcome::Applied);
        assert_eq!(book.current().unwrap().base().as_str(), "GBP");
    }

    #[test]
    fn test_wrong_base_answer_rejected() {
        let mut book = RateBook::new();
        let ticket = book.begin_fetch(&CurrencyCode::new("EUR"));
        let outcome = book.complete(ticket, Ok(table("USD")));
        assert!(matches!(outcome, FetchOutcome::Failed(RateError::FetchFailed { .. })));
        assert!(book.current().is_none());
    }

    #[test]
    fn test_success_clears_warning() {
        let mut book = RateBook::new();
        book.refresh(&FailingProvider, &CurrencyCode::new("USD"));
        assert!(book.warning().is_some());
        let ticket = book.begin_fetch(&CurrencyCode::new("USD"));
        book.complete(ticket, Ok(table("USD")));
        assert!(book.warning().is_none());
    }

    #[test]
    fn test_staleness() {
        let now = Utc::now();
        let book = RateBook::new();
        assert!(book.is_stale(now, Duration::hours(1)));

        let old = RateTable::with_timestamp(CurrencyCode::new("USD"), now - Duration::hours(3));
        let book = RateBook::with_table(old);
        assert!(book.is_stale(now, Duration::hours(1)));
        assert!(!book.is_stale(now, Duration::hours(6)));
    }
}
