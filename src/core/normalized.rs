//! Expenses converted into base-currency minor units, and the record of
//! expenses that could not be.

use crate::core::currency::{normalize, CurrencyCode, RateError, RateTable};
use crate::core::expense::{Expense, Share};
use crate::core::money::MinorUnits;
use log::warn;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Why an expense was left out of a computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ExclusionReason {
    /// The expense currency has no rate in the active table.
    RateUnavailable { currency: CurrencyCode },
    /// Explicit shares do not add up to the expense amount.
    SplitMismatch { expected: Decimal, actual: Decimal },
    /// Equal split requested but nobody to split between.
    NoParticipants,
    /// The converted amount does not fit in minor units.
    Overflow,
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateUnavailable { currency } => write!(f, "no rate for {}", currency),
            Self::SplitMismatch { expected, actual } => {
                write!(f, "shares add up to {} but amount is {}", actual, expected)
            }
            Self::NoParticipants => write!(f, "no participants to split between"),
            Self::Overflow => write!(f, "amount out of range"),
        }
    }
}

/// An expense that was left out, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exclusion {
    pub expense_id: Uuid,
    #[serde(flatten)]
    pub reason: ExclusionReason,
}

impl Exclusion {
    pub fn new(expense: &Expense, reason: ExclusionReason) -> Self {
        warn!("excluding expense {}: {}", expense.id(), reason);
        Self {
            expense_id: expense.id(),
            reason,
        }
    }
}

/// An expense together with its amount in the base currency.
#[derive(Debug, Clone, Copy)]
pub struct NormalizedExpense<'a> {
    pub expense: &'a Expense,
    pub amount: MinorUnits,
}

/// Convert every expense into base-currency minor units.
///
/// Expenses whose currency has no rate (or whose converted amount does not
/// fit) are returned as exclusions instead; they are never priced at zero.
pub fn normalize_expenses<'a>(
    expenses: &'a [Expense],
    table: &RateTable,
    base: &CurrencyCode,
    decimal_places: u32,
) -> (Vec<NormalizedExpense<'a>>, Vec<Exclusion>) {
    let mut normalized = Vec::with_capacity(expenses.len());
    let mut excluded = Vec::new();

    for expense in expenses {
        match normalize(expense.amount(), expense.currency(), table, base) {
            Ok(amount) => match MinorUnits::from_decimal(amount, decimal_places) {
                Some(amount) => normalized.push(NormalizedExpense { expense, amount }),
                None => excluded.push(Exclusion::new(expense, ExclusionReason::Overflow)),
            },
            Err(RateError::RateUnavailable { currency }) => excluded.push(Exclusion::new(
                expense,
                ExclusionReason::RateUnavailable { currency },
            )),
            Err(other) => {
                // normalize only ever reports missing rates
                warn!("unexpected rate error for {}: {}", expense.id(), other);
                excluded.push(Exclusion::new(
                    expense,
                    ExclusionReason::RateUnavailable {
                        currency: expense.currency().clone(),
                    },
                ));
            }
        }
    }

    (normalized, excluded)
}

/// Check that explicit shares add up to the expense amount within
/// `tolerance`. Returns the share amounts as apportioning weights.
pub fn check_split(
    shares: &[Share],
    expected: Decimal,
    tolerance: Decimal,
) -> Result<Vec<Decimal>, ExclusionReason> {
    let weights: Vec<Decimal> = shares.iter().map(|s| s.amount).collect();
    let actual = weights
        .iter()
        .try_fold(Decimal::ZERO, |acc, w| acc.checked_add(*w))
        .ok_or(ExclusionReason::Overflow)?;
    let gap = actual.checked_sub(expected).ok_or(ExclusionReason::Overflow)?;
    if gap.abs() > tolerance.abs() {
        return Err(ExclusionReason::SplitMismatch { expected, actual });
    }
    Ok(weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expense::TripId;
    use crate::core::participant::ParticipantId;
    use rust_decimal_macros::dec;

    fn expense(amount: Decimal, currency: &str) -> Expense {
        Expense::new(
            TripId::new("t"),
            ParticipantId::new("A"),
            amount,
            CurrencyCode::new(currency),
        )
        .unwrap()
    }

    #[test]
    fn test_normalize_expenses_splits_out_missing_rates() {
        let usd = CurrencyCode::new("USD");
        let mut table = RateTable::new(usd.clone());
        table.insert(CurrencyCode::new("EUR"), dec!(0.9)).unwrap();

        let expenses = vec![
            expense(dec!(10), "USD"),
            expense(dec!(9), "EUR"),
            expense(dec!(500), "THB"),
        ];
        let (normalized, excluded) = normalize_expenses(&expenses, &table, &usd, 2);

        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized[0].amount, MinorUnits::new(1000));
        assert_eq!(normalized[1].amount, MinorUnits::new(1000));
        assert_eq!(excluded.len(), 1);
        assert_eq!(excluded[0].expense_id, expenses[2].id());
        assert_eq!(
            excluded[0].reason,
            ExclusionReason::RateUnavailable {
                currency: CurrencyCode::new("THB")
            }
        );
    }

    #[test]
    fn test_check_split_within_tolerance() {
        let shares = vec![
            Share::new(ParticipantId::new("A"), dec!(33.33)),
            Share::new(ParticipantId::new("B"), dec!(66.668)),
        ];
        let weights = check_split(&shares, dec!(100), dec!(0.005)).unwrap();
        assert_eq!(weights, vec![dec!(33.33), dec!(66.668)]);

        assert_eq!(
            check_split(&shares[..1], dec!(100), dec!(0.005)),
            Err(ExclusionReason::SplitMismatch {
                expected: dec!(100),
                actual: dec!(33.33)
            })
        );
    }

    #[test]
    fn test_check_split_overflowing_shares() {
        let shares = vec![
            Share::new(ParticipantId::new("A"), Decimal::MAX),
            Share::new(ParticipantId::new("B"), Decimal::MAX),
        ];
        assert_eq!(
            check_split(&shares, dec!(1), dec!(0.005)),
            Err(ExclusionReason::Overflow)
        );
    }

    #[test]
    fn test_exclusion_serializes_flat() {
        let e = expense(dec!(1), "USD");
        let exclusion = Exclusion::new(&e, ExclusionReason::NoParticipants);
        let json = serde_json::to_value(&exclusion).unwrap();
        assert_eq!(json["reason"], "no_participants");
        assert!(json.get("expense_id").is_some());
    }
}
