use crate::config::LedgerConfig;
use crate::core::currency::CurrencyCode;
use crate::core::money::{round_to_zero_sum, MinorUnits};
use crate::core::participant::ParticipantId;
use crate::settlement::aggregator::BalanceSheet;
use log::{debug, error};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SettlementError {
    #[error("balance for {participant} is not a valid amount: {reason}")]
    InvalidInput {
        participant: ParticipantId,
        reason: String,
    },
    #[error("balances do not sum to zero (residual {residual})")]
    LedgerImbalance { residual: Decimal },
    #[error("balances are too large to total")]
    Overflow,
}

/// A single directed payment that moves a debtor and a creditor toward zero.
///
/// Always has `from != to` and a strictly positive amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    from: ParticipantId,
    to: ParticipantId,
    amount: Decimal,
    currency: CurrencyCode,
}

impl Settlement {
    pub fn from(&self) -> &ParticipantId {
        &self.from
    }

    pub fn to(&self) -> &ParticipantId {
        &self.to
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> &CurrencyCode {
        &self.currency
    }

    /// Whether `participant` pays or receives in this settlement.
    pub fn involves(&self, participant: &ParticipantId) -> bool {
        &self.from == participant || &self.to == participant
    }
}

impl fmt::Display for Settlement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} pays {} {} {}",
            self.from, self.to, self.amount, self.currency
        )
    }
}

/// Turns net balances into a short list of payments.
///
/// # Algorithm
///
/// Greedy largest-debtor / largest-creditor matching:
///
/// 1. Drop participants within the tolerance of zero; split the rest into
///    debtors and creditors.
/// 2. Pair the largest debtor with the largest creditor (equal balances are
///    broken by the smallest participant id), transfer the smaller of the
///    two magnitudes, and retire whoever reaches zero.
/// 3. Stop when either side is empty.
///
/// Every round retires at least one participant, so `N` participants need
/// at most `N - 1` payments. Selection is a linear scan, `O(N²)` overall.
#[derive(Debug, Clone, Default)]
pub struct SettlementSolver {
    config: LedgerConfig,
}

impl SettlementSolver {
    pub fn new(config: LedgerConfig) -> Self {
        Self { config }
    }

    /// Settle a map of decimal balances in `base`.
    ///
    /// The zero-sum check and the tolerance filter run on the exact amounts.
    /// Whatever is left is rounded to the minor unit with largest-remainder
    /// rounding, so the rounded positions still total zero. Any amount that
    /// cannot be represented rejects the whole computation.
    pub fn settle(
        &self,
        balances: &BTreeMap<ParticipantId, Decimal>,
        base: &CurrencyCode,
    ) -> Result<Vec<Settlement>, SettlementError> {
        let dp = self.config.decimal_places;
        let tolerance = self.config.tolerance.abs();

        let mut total = Decimal::ZERO;
        for (participant, amount) in balances {
            if MinorUnits::from_decimal(*amount, dp).is_none() {
                return Err(SettlementError::InvalidInput {
                    participant: participant.clone(),
                    reason: format!("{} is out of range", amount),
                });
            }
            total = total.checked_add(*amount).ok_or(SettlementError::Overflow)?;
        }
        if total.abs() > tolerance {
            error!("refusing to settle unbalanced ledger: residual {} {}", total, base);
            return Err(SettlementError::LedgerImbalance { residual: total });
        }

        let (participants, amounts): (Vec<&ParticipantId>, Vec<Decimal>) = balances
            .iter()
            .filter(|(_, v)| v.abs() > tolerance)
            .map(|(p, v)| (p, *v))
            .unzip();
        let rounded = round_to_zero_sum(&amounts, dp).ok_or(SettlementError::Overflow)?;
        let positions: BTreeMap<ParticipantId, MinorUnits> = participants
            .into_iter()
            .cloned()
            .zip(rounded)
            .collect();
        self.settle_units(&positions, base)
    }

    /// Settle balances that arrive as floats, rejecting NaN and infinities.
    pub fn settle_f64(
        &self,
        balances: &BTreeMap<ParticipantId, f64>,
        base: &CurrencyCode,
    ) -> Result<Vec<Settlement>, SettlementError> {
        let mut decimals = BTreeMap::new();
        for (participant, amount) in balances {
            if !amount.is_finite() {
                return Err(SettlementError::InvalidInput {
                    participant: participant.clone(),
                    reason: format!("{} is not finite", amount),
                });
            }
            let value = Decimal::from_f64_retain(*amount).ok_or_else(|| {
                SettlementError::InvalidInput {
                    participant: participant.clone(),
                    reason: format!("{} is out of range", amount),
                }
            })?;
            decimals.insert(participant.clone(), value);
        }
        self.settle(&decimals, base)
    }

    /// Settle a balance sheet produced by the aggregator.
    pub fn settle_sheet(&self, sheet: &BalanceSheet) -> Result<Vec<Settlement>, SettlementError> {
        self.settle_units(sheet.ledger().positions(), sheet.base_currency())
    }

    fn settle_units(
        &self,
        positions: &BTreeMap<ParticipantId, MinorUnits>,
        base: &CurrencyCode,
    ) -> Result<Vec<Settlement>, SettlementError> {
        let dp = self.config.decimal_places;
        let tolerance = self.config.tolerance.abs();
        let outstanding = |units: MinorUnits| units.to_decimal(dp).abs() > tolerance;

        let total = MinorUnits::checked_sum(positions.values().copied())
            .ok_or(SettlementError::Overflow)?;
        if outstanding(total) {
            let residual = total.to_decimal(dp);
            error!("refusing to settle unbalanced ledger: residual {} {}", residual, base);
            return Err(SettlementError::LedgerImbalance { residual });
        }

        // Magnitudes only: debtors hold what they owe, creditors what they are owed.
        let mut debtors: Vec<(&ParticipantId, MinorUnits)> = positions
            .iter()
            .filter(|(_, v)| v.is_negative() && outstanding(**v))
            .map(|(p, v)| (p, v.abs()))
            .collect();
        let mut creditors: Vec<(&ParticipantId, MinorUnits)> = positions
            .iter()
            .filter(|(_, v)| v.is_positive() && outstanding(**v))
            .map(|(p, v)| (p, *v))
            .collect();

        let mut settlements = Vec::with_capacity(debtors.len().max(creditors.len()));
        while let (Some(d), Some(c)) = (largest(&debtors), largest(&creditors)) {
            let amount = debtors[d].1.min(creditors[c].1);
            let settlement = Settlement {
                from: debtors[d].0.clone(),
                to: creditors[c].0.clone(),
                amount: amount.to_decimal(dp),
                currency: base.clone(),
            };
            debug!("settlement: {}", settlement);
            settlements.push(settlement);

            // amount is the smaller magnitude, so neither side can go negative
            debtors[d].1 = MinorUnits::new(debtors[d].1.value() - amount.value());
            creditors[c].1 = MinorUnits::new(creditors[c].1.value() - amount.value());
            if !outstanding(debtors[d].1) {
                debtors.remove(d);
            }
            if !outstanding(creditors[c].1) {
                creditors.remove(c);
            }
        }

        let owed = MinorUnits::checked_sum(creditors.iter().map(|(_, v)| *v));
        let owing = MinorUnits::checked_sum(debtors.iter().map(|(_, v)| *v));
        let leftover = owed
            .zip(owing)
            .and_then(|(owed, owing)| owed.checked_sub(owing))
            .ok_or(SettlementError::Overflow)?;
        if outstanding(leftover) {
            let residual = leftover.to_decimal(dp);
            error!(
                "settlement left {} {} unmatched across {} participants",
                residual,
                base,
                debtors.len() + creditors.len()
            );
            return Err(SettlementError::LedgerImbalance { residual });
        }

        Ok(settlements)
    }
}

/// Index of the largest amount; equal amounts go to the smallest id.
fn largest(side: &[(&ParticipantId, MinorUnits)]) -> Option<usize> {
    side.iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(idx, _)| idx)
}

/// Settle with the default [`LedgerConfig`].
pub fn settle(
    balances: &BTreeMap<ParticipantId, Decimal>,
    base: &CurrencyCode,
) -> Result<Vec<Settlement>, SettlementError> {
    SettlementSolver::default().settle(balances, base)
}

/// Apply payments to a balance map: each payer's balance rises and each
/// payee's falls by the amount paid.
pub fn apply_settlements(
    balances: &BTreeMap<ParticipantId, Decimal>,
    settlements: &[Settlement],
) -> BTreeMap<ParticipantId, Decimal> {
    let mut result = balances.clone();
    for s in settlements {
        *result.entry(s.from.clone()).or_insert(Decimal::ZERO) += s.amount;
        *result.entry(s.to.clone()).or_insert(Decimal::ZERO) -= s.amount;
    }
    result
}
