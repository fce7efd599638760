//! A trip's ledger view: its expenses, base currency and rate table, and
//! the flow that switches the base currency.

use crate::config::LedgerConfig;
use crate::core::currency::{normalize, CurrencyCode, RateError, RateTable};
use crate::core::expense::{Expense, ExpenseError, ExpenseSet, ExpenseUpdate, Share, ShareSpec, TripId};
use crate::core::money::{apportion, MinorUnits};
use crate::core::normalized::{check_split, Exclusion, ExclusionReason};
use crate::core::participant::ParticipantId;
use crate::rates::book::{FetchOutcome, FetchTicket, RateBook};
use crate::rates::provider::RateProvider;
use crate::settlement::aggregator::{BalanceAggregator, BalanceSheet};
use crate::settlement::solver::{Settlement, SettlementError, SettlementSolver};
use crate::statistics::summary::StatisticsSummary;
use crate::store::{ExpenseStore, StoreError};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TripError {
    #[error("{actor} may not change the base currency of this trip")]
    Unauthorized { actor: ParticipantId },
    #[error("expense belongs to trip {found}, not {expected}")]
    WrongTrip { expected: TripId, found: TripId },
    #[error("switch to {base} was overtaken by a newer switch")]
    Superseded { base: CurrencyCode },
    #[error(transparent)]
    RateFetch(#[from] RateError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Settlement(#[from] SettlementError),
    #[error(transparent)]
    Expense(#[from] ExpenseError),
}

/// Trip metadata the ledger needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub id: TripId,
    pub name: String,
    pub created_by: ParticipantId,
    pub participants: BTreeSet<ParticipantId>,
    /// Currency declared when the trip was set up, if any.
    pub currency: Option<CurrencyCode>,
}

impl Trip {
    /// A trip whose only participant so far is its creator.
    pub fn new(id: TripId, name: impl Into<String>, created_by: ParticipantId) -> Self {
        let mut participants = BTreeSet::new();
        participants.insert(created_by.clone());
        Self {
            id,
            name: name.into(),
            created_by,
            participants,
            currency: None,
        }
    }

    pub fn with_participant(mut self, participant: ParticipantId) -> Self {
        self.participants.insert(participant);
        self
    }

    pub fn with_currency(mut self, currency: CurrencyCode) -> Self {
        self.currency = Some(currency);
        self
    }

    /// Only the creator may change the trip's base currency.
    pub fn can_switch_currency(&self, actor: &ParticipantId) -> bool {
        actor == &self.created_by
    }
}

/// Pick a base currency for a trip that has not had one chosen explicitly.
///
/// The trip's declared currency wins; otherwise the currency used by the
/// most expenses (ties go to the alphabetically first code); otherwise the
/// configured default.
pub fn infer_base_currency(trip: &Trip, expenses: &[Expense], config: &LedgerConfig) -> CurrencyCode {
    if let Some(currency) = &trip.currency {
        return currency.clone();
    }
    let mut counts: BTreeMap<&CurrencyCode, usize> = BTreeMap::new();
    for expense in expenses {
        *counts.entry(expense.currency()).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(currency, _)| currency.clone())
        .unwrap_or_else(|| config.default_currency.clone())
}

/// Result of a base-currency switch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchReport {
    pub from: CurrencyCode,
    pub to: CurrencyCode,
    /// Expenses rewritten into the new currency.
    pub repriced: usize,
    /// Expenses already in the new currency.
    pub unchanged: usize,
    /// Expenses left in their old currency because they could not be priced.
    pub skipped: Vec<Exclusion>,
    /// Expenses left in their old currency because the store refused the
    /// rewrite.
    pub failed: Vec<Uuid>,
}

/// A trip's expenses as seen in one base currency.
///
/// Balances, settlements and statistics are recomputed on every call from
/// the expense snapshot and the rate table in effect.
#[derive(Debug, Clone)]
pub struct TripLedger {
    trip: Trip,
    base: CurrencyCode,
    rates: RateBook,
    expenses: ExpenseSet,
    config: LedgerConfig,
}

impl TripLedger {
    /// An empty ledger with an inferred base currency and no rates yet.
    pub fn new(trip: Trip, config: LedgerConfig) -> Self {
        let base = infer_base_currency(&trip, &[], &config);
        Self {
            trip,
            base,
            rates: RateBook::new(),
            expenses: ExpenseSet::new(),
            config,
        }
    }

    /// Load a trip's expenses from `store` and fetch rates for the inferred
    /// base currency. A failed fetch is logged; the ledger then only prices
    /// expenses already in the base currency.
    pub fn load(
        trip: Trip,
        store: &dyn ExpenseStore,
        provider: &dyn RateProvider,
        config: LedgerConfig,
    ) -> Result<Self, TripError> {
        let expenses = store.list_expenses(&trip.id)?;
        let base = infer_base_currency(&trip, &expenses, &config);
        let mut rates = RateBook::new();
        if let FetchOutcome::Failed(err) = rates.refresh(provider, &base) {
            warn!("loading trip {} without rates: {}", trip.id, err);
        }
        debug!("loaded {} expenses for trip {} in {}", expenses.len(), trip.id, base);
        Ok(Self {
            trip,
            base,
            rates,
            expenses: expenses.into_iter().collect(),
            config,
        })
    }

    /// Install a rate table directly, e.g. one restored from a cache.
    pub fn with_rates(mut self, table: RateTable) -> Self {
        self.base = table.base().clone();
        self.rates = RateBook::with_table(table);
        self
    }

    pub fn trip(&self) -> &Trip {
        &self.trip
    }

    pub fn base_currency(&self) -> &CurrencyCode {
        &self.base
    }

    pub fn rates(&self) -> &RateBook {
        &self.rates
    }

    pub fn expenses(&self) -> &[Expense] {
        self.expenses.expenses()
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Add a participant to the trip (e.g. the current user before their
    /// first expense).
    pub fn add_participant(&mut self, participant: ParticipantId) {
        self.trip.participants.insert(participant);
    }

    /// Persist a new expense and add it to the snapshot.
    pub fn record_expense(
        &mut self,
        store: &mut dyn ExpenseStore,
        expense: Expense,
    ) -> Result<&Expense, TripError> {
        if expense.trip_id() != &self.trip.id {
            return Err(TripError::WrongTrip {
                expected: self.trip.id.clone(),
                found: expense.trip_id().clone(),
            });
        }
        let stored = store.create_expense(expense)?;
        self.expenses.add(stored);
        let expenses = self.expenses.expenses();
        Ok(&expenses[expenses.len() - 1])
    }

    fn active_table(&self) -> Cow<'_, RateTable> {
        match self.rates.current() {
            Some(table) => Cow::Borrowed(table),
            None => Cow::Owned(RateTable::new(self.base.clone())),
        }
    }

    pub fn balances(&self) -> BalanceSheet {
        BalanceAggregator::new(self.config.clone()).aggregate(
            self.expenses.expenses(),
            &self.trip.participants,
            &self.active_table(),
            &self.base,
        )
    }

    /// Who pays whom to settle the whole trip.
    pub fn settlements(&self) -> Result<Vec<Settlement>, TripError> {
        let sheet = self.balances();
        sheet.verify_zero_sum(self.config.tolerance)?;
        Ok(SettlementSolver::new(self.config.clone()).settle_sheet(&sheet)?)
    }

    /// The settlements `participant` pays or receives.
    pub fn settlements_for(&self, participant: &ParticipantId) -> Result<Vec<Settlement>, TripError> {
        Ok(self
            .settlements()?
            .into_iter()
            .filter(|s| s.involves(participant))
            .collect())
    }

    pub fn summary(&self) -> StatisticsSummary {
        StatisticsSummary::summarize(
            self.expenses.expenses(),
            &self.active_table(),
            &self.base,
            &self.config,
        )
    }

    /// Start switching to `new_base`: check the actor and register a rate
    /// fetch. Hand the fetched result to [`TripLedger::finish_switch`].
    pub fn begin_switch(
        &mut self,
        actor: &ParticipantId,
        new_base: &CurrencyCode,
    ) -> Result<FetchTicket, TripError> {
        if !self.trip.can_switch_currency(actor) {
            return Err(TripError::Unauthorized {
                actor: actor.clone(),
            });
        }
        Ok(self.rates.begin_fetch(new_base))
    }

    /// Complete a switch with the fetched rates, re-pricing every expense
    /// into the new base and writing each change through `store`.
    ///
    /// A failed fetch leaves base currency, rates and expenses untouched. A
    /// fetch overtaken by a newer switch is ignored. Every rewrite is
    /// computed and validated before the first store write; if that fails,
    /// the previous rates are restored. Once writing starts the switch
    /// always completes, and expenses the store refused stay in their old
    /// currency in both the store and the snapshot, listed in
    /// [`SwitchReport::failed`].
    pub fn finish_switch(
        &mut self,
        ticket: FetchTicket,
        fetched: Result<RateTable, RateError>,
        store: &mut dyn ExpenseStore,
    ) -> Result<SwitchReport, TripError> {
        let new_base = ticket.base().clone();
        let seq = ticket.seq();
        let previous_rates = self.rates.clone();
        match self.rates.complete(ticket, fetched) {
            FetchOutcome::Applied => {}
            FetchOutcome::Superseded => {
                warn!("switch #{} to {} dropped, a newer switch landed first", seq, new_base);
                return Err(TripError::Superseded { base: new_base });
            }
            FetchOutcome::Failed(err) => return Err(TripError::RateFetch(err)),
        }
        let table = self.active_table().into_owned();

        let mut report = SwitchReport {
            from: self.base.clone(),
            to: new_base.clone(),
            repriced: 0,
            unchanged: 0,
            skipped: Vec::new(),
            failed: Vec::new(),
        };

        let mut planned: Vec<(usize, ExpenseUpdate, Expense)> = Vec::new();
        for (idx, expense) in self.expenses.expenses().iter().enumerate() {
            if expense.currency() == &new_base {
                report.unchanged += 1;
                continue;
            }
            match reprice_update(expense, &table, &new_base, &self.config) {
                Ok(update) => {
                    let mut repriced = expense.clone();
                    if let Err(err) = repriced.reprice(update.clone()) {
                        self.rates = previous_rates;
                        return Err(TripError::Expense(err));
                    }
                    planned.push((idx, update, repriced));
                }
                Err(reason) => report.skipped.push(Exclusion::new(expense, reason)),
            }
        }

        for (idx, update, repriced) in planned {
            debug!(
                "repricing {}: {} {} -> {} {}",
                repriced.id(),
                self.expenses.expenses()[idx].amount(),
                self.expenses.expenses()[idx].currency(),
                update.amount,
                update.currency
            );
            match store.update_expense(repriced.id(), update) {
                Ok(()) => {
                    self.expenses.expenses_mut()[idx] = repriced;
                    report.repriced += 1;
                }
                Err(err) => {
                    warn!("keeping expense {} in its old currency: {}", repriced.id(), err);
                    report.failed.push(repriced.id());
                }
            }
        }

        info!(
            "trip {} base currency {} -> {} by switch #{} ({} repriced, {} skipped, {} failed)",
            self.trip.id,
            report.from,
            report.to,
            seq,
            report.repriced,
            report.skipped.len(),
            report.failed.len()
        );
        self.base = new_base;
        Ok(report)
    }

    /// Switch the base currency, fetching rates synchronously.
    pub fn switch_base_currency(
        &mut self,
        actor: &ParticipantId,
        new_base: &CurrencyCode,
        provider: &dyn RateProvider,
        store: &mut dyn ExpenseStore,
    ) -> Result<SwitchReport, TripError> {
        let ticket = self.begin_switch(actor, new_base)?;
        let fetched = provider.fetch_rates(new_base);
        self.finish_switch(ticket, fetched, store)
    }
}

/// The rewrite that moves `expense` into `base`, with explicit shares
/// re-apportioned so they still add up to the new amount. Shares that do
/// not add up to the current amount are left alone, as the aggregator
/// leaves them out too.
fn reprice_update(
    expense: &Expense,
    table: &RateTable,
    base: &CurrencyCode,
    config: &LedgerConfig,
) -> Result<ExpenseUpdate, ExclusionReason> {
    let dp = config.decimal_places;
    let weights = match expense.shares() {
        ShareSpec::Equal => None,
        ShareSpec::Explicit(shares) => Some(check_split(shares, expense.amount(), config.tolerance)?),
    };
    let converted = match normalize(expense.amount(), expense.currency(), table, base) {
        Ok(amount) => amount,
        Err(_) => {
            return Err(ExclusionReason::RateUnavailable {
                currency: expense.currency().clone(),
            })
        }
    };
    let units = MinorUnits::from_decimal(converted, dp).ok_or(ExclusionReason::Overflow)?;

    let shares = match (expense.shares(), weights) {
        (ShareSpec::Explicit(shares), Some(weights)) => {
            let parts = apportion(units, &weights).ok_or(ExclusionReason::Overflow)?;
            Some(
                shares
                    .iter()
                    .zip(parts)
                    .map(|(s, part)| Share::new(s.participant.clone(), part.to_decimal(dp)))
                    .collect(),
            )
        }
        _ => None,
    };

    Ok(ExpenseUpdate {
        amount: units.to_decimal(dp),
        currency: base.clone(),
        shares,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rates::provider::StaticRateProvider;
    use crate::store::InMemoryExpenseStore;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn trip() -> Trip {
        Trip::new(TripId::new("kyoto"), "Kyoto", ParticipantId::new("A"))
            .with_participant(ParticipantId::new("B"))
    }

    fn provider() -> StaticRateProvider {
        StaticRateProvider::from_pairs(
            CurrencyCode::new("USD"),
            [
                (CurrencyCode::new("EUR"), dec!(0.5)),
                (CurrencyCode::new("JPY"), dec!(100)),
            ],
        )
        .unwrap()
    }

    fn expense(payer: &str, amount: Decimal, currency: &str) -> Expense {
        Expense::new(
            TripId::new("kyoto"),
            ParticipantId::new(payer),
            amount,
            CurrencyCode::new(currency),
        )
        .unwrap()
    }

    #[test]
    fn test_infer_prefers_declared_currency() {
        let t = trip().with_currency(CurrencyCode::new("CHF"));
        let base = infer_base_currency(&t, &[expense("A", dec!(1), "JPY")], &LedgerConfig::default());
        assert_eq!(base.as_str(), "CHF");
    }

    #[test]
    fn test_infer_most_common_currency() {
        let expenses = vec![
            expense("A", dec!(1), "JPY"),
            expense("A", dec!(1), "USD"),
            expense("B", dec!(1), "JPY"),
        ];
        let base = infer_base_currency(&trip(), &expenses, &LedgerConfig::default());
        assert_eq!(base.as_str(), "JPY");
    }

    #[test]
    fn test_infer_tie_and_default() {
        let expenses = vec![expense("A", dec!(1), "USD"), expense("A", dec!(1), "EUR")];
        let config = LedgerConfig::default();
        assert_eq!(infer_base_currency(&trip(), &expenses, &config).as_str(), "EUR");
        assert_eq!(infer_base_currency(&trip(), &[], &config).as_str(), "USD");
    }

    #[test]
    fn test_switch_reprices_through_store() {
        let mut store = InMemoryExpenseStore::new();
        let mut ledger = TripLedger::load(trip(), &store, &provider(), LedgerConfig::default()).unwrap();
        let jpy = ledger
            .record_expense(&mut store, expense("A", dec!(1000), "JPY"))
            .unwrap()
            .id();
        ledger
            .record_expense(&mut store, expense("B", dec!(4), "USD"))
            .unwrap();

        let report = ledger
            .switch_base_currency(
                &ParticipantId::new("A"),
                &CurrencyCode::new("USD"),
                &provider(),
                &mut store,
            )
            .unwrap();

        assert_eq!(report.repriced, 1);
        assert_eq!(report.unchanged, 1);
        assert_eq!(store.get(jpy).unwrap().amount(), dec!(10));
        assert_eq!(store.get(jpy).unwrap().currency().as_str(), "USD");
        assert_eq!(ledger.balances().net(&ParticipantId::new("A")), dec!(3));
    }

    #[test]
    fn test_switch_requires_creator() {
        let mut store = InMemoryExpenseStore::new();
        let mut ledger = TripLedger::new(trip(), LedgerConfig::default());
        let err = ledger
            .switch_base_currency(
                &ParticipantId::new("B"),
                &CurrencyCode::new("EUR"),
                &provider(),
                &mut store,
            )
            .unwrap_err();
        assert!(matches!(err, TripError::Unauthorized { .. }));
    }

    #[test]
    fn test_failed_fetch_keeps_base() {
        let mut store = InMemoryExpenseStore::new();
        let mut ledger = TripLedger::new(trip(), LedgerConfig::default());
        let err = ledger
            .switch_base_currency(
                &ParticipantId::new("A"),
                &CurrencyCode::new("NOK"),
                &provider(),
                &mut store,
            )
            .unwrap_err();
        assert!(matches!(err, TripError::RateFetch(_)));
        assert_eq!(ledger.base_currency().as_str(), "USD");
    }

    #[test]
    fn test_reprice_keeps_explicit_shares_summing() {
        let e = expense("A", dec!(10), "USD")
            .with_shares(vec![
                Share::new(ParticipantId::new("A"), dec!(5)),
                Share::new(ParticipantId::new("B"), dec!(5)),
            ])
            .unwrap();
        let table = provider().fetch_rates(&CurrencyCode::new("JPY")).unwrap();
        let update = reprice_update(&e, &table, &CurrencyCode::new("JPY"), &LedgerConfig::default()).unwrap();
        assert_eq!(update.amount, dec!(1000));
        let shares = update.shares.unwrap();
        assert_eq!(shares[0].amount + shares[1].amount, dec!(1000));
    }

    #[test]
    fn test_switch_skips_shares_that_do_not_add_up() {
        let mut store = InMemoryExpenseStore::new();
        let mut ledger = TripLedger::load(trip(), &store, &provider(), LedgerConfig::default()).unwrap();
        let id = ledger
            .record_expense(
                &mut store,
                expense("A", dec!(50), "USD")
                    .with_shares(vec![Share::new(ParticipantId::new("B"), dec!(20))])
                    .unwrap(),
            )
            .unwrap()
            .id();
        assert_eq!(ledger.balances().excluded_count(), 1);

        let report = ledger
            .switch_base_currency(
                &ParticipantId::new("A"),
                &CurrencyCode::new("EUR"),
                &provider(),
                &mut store,
            )
            .unwrap();

        assert_eq!(report.repriced, 0);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].expense_id, id);
        assert!(matches!(report.skipped[0].reason, ExclusionReason::SplitMismatch { .. }));
        assert_eq!(store.get(id).unwrap().amount(), dec!(50));
        assert_eq!(store.get(id).unwrap().currency().as_str(), "USD");

        let sheet = ledger.balances();
        assert_eq!(sheet.excluded_count(), 1);
        assert_eq!(sheet.net(&ParticipantId::new("A")), Decimal::ZERO);
        assert_eq!(sheet.net(&ParticipantId::new("B")), Decimal::ZERO);
    }

    /// Store that refuses to rewrite one expense.
    struct RefusingStore {
        inner: InMemoryExpenseStore,
        refused: Option<Uuid>,
    }

    impl ExpenseStore for RefusingStore {
        fn list_expenses(&self, trip: &TripId) -> Result<Vec<Expense>, StoreError> {
            self.inner.list_expenses(trip)
        }

        fn create_expense(&mut self, expense: Expense) -> Result<Expense, StoreError> {
            self.inner.create_expense(expense)
        }

        fn update_expense(&mut self, id: Uuid, update: ExpenseUpdate) -> Result<(), StoreError> {
            if self.refused == Some(id) {
                return Err(StoreError::NotFound(id));
            }
            self.inner.update_expense(id, update)
        }
    }

    #[test]
    fn test_refused_write_keeps_store_and_snapshot_in_step() {
        let mut store = RefusingStore {
            inner: InMemoryExpenseStore::new(),
            refused: None,
        };
        let mut ledger = TripLedger::load(trip(), &store, &provider(), LedgerConfig::default()).unwrap();
        let kept = ledger
            .record_expense(&mut store, expense("A", dec!(1000), "JPY"))
            .unwrap()
            .id();
        let moved = ledger
            .record_expense(&mut store, expense("B", dec!(2000), "JPY"))
            .unwrap()
            .id();
        store.refused = Some(kept);

        let report = ledger
            .switch_base_currency(
                &ParticipantId::new("A"),
                &CurrencyCode::new("USD"),
                &provider(),
                &mut store,
            )
            .unwrap();

        assert_eq!(report.repriced, 1);
        assert_eq!(report.failed, vec![kept]);
        assert_eq!(ledger.base_currency().as_str(), "USD");

        for id in [kept, moved] {
            let stored = store.inner.get(id).unwrap();
            let snapshot = ledger.expenses().iter().find(|e| e.id() == id).unwrap();
            assert_eq!(snapshot.amount(), stored.amount());
            assert_eq!(snapshot.currency(), stored.currency());
        }
        assert_eq!(store.inner.get(kept).unwrap().currency().as_str(), "JPY");
        assert_eq!(store.inner.get(moved).unwrap().amount(), dec!(20));

        // the refused expense is still priced through the new table
        let sheet = ledger.balances();
        assert_eq!(sheet.excluded_count(), 0);
        assert_eq!(sheet.net(&ParticipantId::new("A")), dec!(-5));
        assert_eq!(sheet.net(&ParticipantId::new("B")), dec!(5));
    }

    #[test]
    fn test_with_rates_and_late_participant() {
        let table = provider().fetch_rates(&CurrencyCode::new("EUR")).unwrap();
        let mut ledger = TripLedger::new(trip(), LedgerConfig::default()).with_rates(table);
        assert_eq!(ledger.base_currency().as_str(), "EUR");

        let mut store = InMemoryExpenseStore::new();
        ledger
            .record_expense(&mut store, expense("A", dec!(30), "EUR"))
            .unwrap();
        ledger.add_participant(ParticipantId::new("C"));

        let sheet = ledger.balances();
        assert_eq!(sheet.net(&ParticipantId::new("A")), dec!(20));
        assert_eq!(sheet.net(&ParticipantId::new("C")), dec!(-10));
    }

    #[test]
    fn test_record_expense_wrong_trip() {
        let mut store = InMemoryExpenseStore::new();
        let mut ledger = TripLedger::new(trip(), LedgerConfig::default());
        let other = Expense::new(
            TripId::new("lima"),
            ParticipantId::new("A"),
            dec!(1),
            CurrencyCode::new("USD"),
        )
        .unwrap();
        assert!(matches!(
            ledger.record_expense(&mut store, other),
            Err(TripError::WrongTrip { .. })
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_settlements_for_participant() {
        let mut store = InMemoryExpenseStore::new();
        let mut ledger = TripLedger::new(trip().with_participant(ParticipantId::new("C")), LedgerConfig::default());
        ledger
            .record_expense(&mut store, expense("A", dec!(90), "USD"))
            .unwrap();
        let for_b = ledger.settlements_for(&ParticipantId::new("B")).unwrap();
        assert_eq!(for_b.len(), 1);
        assert_eq!(for_b[0].to().as_str(), "A");
        assert_eq!(ledger.settlements().unwrap().len(), 2);
    }
}
