use crate::config::LedgerConfig;
use crate::core::currency::{CurrencyCode, RateTable};
use crate::core::expense::{Expense, ShareSpec};
use crate::core::ledger::Ledger;
use crate::core::money::{apportion, split_even, MinorUnits};
use crate::core::normalized::{
    check_split, normalize_expenses, Exclusion, ExclusionReason, NormalizedExpense,
};
use crate::core::participant::ParticipantId;
use crate::settlement::solver::SettlementError;
use log::{debug, error};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Net balance of every participant after folding in a set of expenses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceSheet {
    base_currency: CurrencyCode,
    decimal_places: u32,
    ledger: Ledger,
    included: usize,
    excluded: Vec<Exclusion>,
}

impl BalanceSheet {
    pub fn base_currency(&self) -> &CurrencyCode {
        &self.base_currency
    }

    /// Signed net amount per participant, rounded to the minor unit.
    pub fn balances(&self) -> BTreeMap<ParticipantId, Decimal> {
        self.ledger.to_decimals(self.decimal_places)
    }

    /// Net amount for one participant (zero if they never appeared).
    pub fn net(&self, participant: &ParticipantId) -> Decimal {
        self.ledger
            .position(participant)
            .to_decimal(self.decimal_places)
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Number of expenses that made it into the balances.
    pub fn included_count(&self) -> usize {
        self.included
    }

    pub fn excluded(&self) -> &[Exclusion] {
        &self.excluded
    }

    pub fn excluded_count(&self) -> usize {
        self.excluded.len()
    }

    /// Check that the balances sum to zero within `tolerance`.
    pub fn verify_zero_sum(&self, tolerance: Decimal) -> Result<(), SettlementError> {
        let residual = self
            .ledger
            .total()
            .ok_or(SettlementError::Overflow)?
            .to_decimal(self.decimal_places);
        if residual.abs() > tolerance.abs() {
            error!(
                "balance sheet in {} does not sum to zero: residual {}",
                self.base_currency, residual
            );
            return Err(SettlementError::LedgerImbalance { residual });
        }
        Ok(())
    }
}

/// Folds expenses into per-participant net balances.
///
/// # Algorithm
///
/// For every expense that can be normalized into the base currency:
///
/// 1. Resolve the share set: explicit shares, or every known participant.
/// 2. Debit each share holder by their share.
/// 3. Credit the payer by the full amount.
///
/// Everything runs in integer minor units. Equal splits hand leftover
/// units to share holders in id order; explicit shares are re-apportioned
/// onto the normalized total. Debits therefore always equal the credit, and
/// the sheet sums to exactly zero.
#[derive(Debug, Clone, Default)]
pub struct BalanceAggregator {
    config: LedgerConfig,
}

impl BalanceAggregator {
    pub fn new(config: LedgerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn aggregate(
        &self,
        expenses: &[Expense],
        participants: &BTreeSet<ParticipantId>,
        table: &RateTable,
        base: &CurrencyCode,
    ) -> BalanceSheet {
        let dp = self.config.decimal_places;
        let (normalized, mut excluded) = normalize_expenses(expenses, table, base, dp);

        let mut ledger = Ledger::new();
        for participant in participants {
            ledger.open(participant);
        }

        let mut included = 0;
        for item in &normalized {
            match self.resolve_shares(item, participants) {
                Ok(debits) => match ledger.post(item.expense.payer(), item.amount, &debits) {
                    Ok(()) => included += 1,
                    Err(err) => {
                        debug!("{}", err);
                        excluded.push(Exclusion::new(item.expense, ExclusionReason::Overflow));
                    }
                },
                Err(reason) => excluded.push(Exclusion::new(item.expense, reason)),
            }
        }

        debug!(
            "aggregated {} expenses into {} balances ({} excluded)",
            included,
            ledger.len(),
            excluded.len()
        );

        BalanceSheet {
            base_currency: base.clone(),
            decimal_places: dp,
            ledger,
            included,
            excluded,
        }
    }

    /// Who is debited how much for one normalized expense.
    fn resolve_shares<'a>(
        &self,
        item: &NormalizedExpense<'a>,
        participants: &'a BTreeSet<ParticipantId>,
    ) -> Result<Vec<(&'a ParticipantId, MinorUnits)>, ExclusionReason> {
        match item.expense.shares() {
            ShareSpec::Equal => {
                if participants.is_empty() {
                    return Err(ExclusionReason::NoParticipants);
                }
                let parts = split_even(item.amount, participants.len());
                Ok(participants.iter().zip(parts).collect())
            }
            ShareSpec::Explicit(shares) => {
                let weights = check_split(shares, item.expense.amount(), self.config.tolerance)?;
                let parts = apportion(item.amount, &weights).ok_or(ExclusionReason::Overflow)?;
                Ok(shares.iter().map(|s| &s.participant).zip(parts).collect())
            }
        }
    }
}

/// Aggregate with the default [`LedgerConfig`].
pub fn aggregate(
    expenses: &[Expense],
    participants: &BTreeSet<ParticipantId>,
    table: &RateTable,
    base: &CurrencyCode,
) -> BalanceSheet {
    BalanceAggregator::default().aggregate(expenses, participants, table, base)
}
