use crate::config::LedgerConfig;
use crate::core::currency::{CurrencyCode, RateTable};
use crate::core::expense::Expense;
use crate::core::money::MinorUnits;
use crate::core::normalized::{normalize_expenses, Exclusion, ExclusionReason};
use crate::core::participant::ParticipantId;
use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sum and count of the expenses falling in one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupTotal {
    pub total: Decimal,
    pub count: usize,
    /// Share of the overall total, 0–100.
    pub percent: f64,
}

/// Per-currency totals, both as spent and as converted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyTotal {
    pub native_total: Decimal,
    pub base_total: Decimal,
    pub count: usize,
}

/// Dashboard aggregates over a trip's expenses, in the base currency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsSummary {
    pub base_currency: CurrencyCode,
    pub total_expenses: Decimal,
    pub average_expense: Decimal,
    pub expense_count: usize,
    pub category_breakdown: BTreeMap<String, GroupTotal>,
    pub currency_breakdown: BTreeMap<CurrencyCode, CurrencyTotal>,
    pub payer_breakdown: BTreeMap<ParticipantId, GroupTotal>,
    pub daily_totals: BTreeMap<NaiveDate, Decimal>,
    pub last_expense_date: Option<NaiveDate>,
    pub excluded: Vec<Exclusion>,
}

#[derive(Default)]
struct Tally {
    units: MinorUnits,
    native: Decimal,
    count: usize,
}

impl Tally {
    fn record(&mut self, amount: MinorUnits) {
        self.units = bounded_add(self.units, amount);
        self.count += 1;
    }
}

/// Add two non-negative group sums. Each group is part of the overall total,
/// which has already been checked, so this cannot saturate.
fn bounded_add(a: MinorUnits, b: MinorUnits) -> MinorUnits {
    MinorUnits::new(a.value().saturating_add(b.value()))
}

impl StatisticsSummary {
    /// Group and total `expenses` after converting them to `base`.
    ///
    /// Expenses without a usable rate are listed in `excluded` and left out
    /// of every figure, including the count.
    pub fn summarize(
        expenses: &[Expense],
        table: &RateTable,
        base: &CurrencyCode,
        config: &LedgerConfig,
    ) -> Self {
        let dp = config.decimal_places;
        let (normalized, mut excluded) = normalize_expenses(expenses, table, base, dp);

        let mut total = MinorUnits::ZERO;
        let mut expense_count = 0;
        let mut categories: BTreeMap<String, Tally> = BTreeMap::new();
        let mut currencies: BTreeMap<CurrencyCode, Tally> = BTreeMap::new();
        let mut payers: BTreeMap<ParticipantId, Tally> = BTreeMap::new();
        let mut daily: BTreeMap<NaiveDate, MinorUnits> = BTreeMap::new();
        let mut last_expense_date: Option<NaiveDate> = None;

        for item in &normalized {
            let expense = item.expense;
            let native = currencies
                .get(expense.currency())
                .map_or(Decimal::ZERO, |t| t.native);
            let (next_total, next_native) = match (
                total.checked_add(item.amount),
                native.checked_add(expense.amount()),
            ) {
                (Some(t), Some(n)) => (t, n),
                _ => {
                    excluded.push(Exclusion::new(expense, ExclusionReason::Overflow));
                    continue;
                }
            };
            total = next_total;
            expense_count += 1;

            categories
                .entry(expense.category().to_string())
                .or_default()
                .record(item.amount);

            let currency = currencies.entry(expense.currency().clone()).or_default();
            currency.record(item.amount);
            currency.native = next_native;

            payers.entry(expense.payer().clone()).or_default().record(item.amount);

            let day = expense.day();
            let daily_total = daily.entry(day).or_insert(MinorUnits::ZERO);
            *daily_total = bounded_add(*daily_total, item.amount);
            last_expense_date = last_expense_date.max(Some(day));
        }

        let total_expenses = total.to_decimal(dp);
        let average_expense = if expense_count == 0 {
            Decimal::ZERO
        } else {
            (total_expenses / Decimal::from(expense_count))
                .round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
        };

        let group = |tally: &Tally| GroupTotal {
            total: tally.units.to_decimal(dp),
            count: tally.count,
            percent: percent_of(tally.units, total),
        };

        StatisticsSummary {
            base_currency: base.clone(),
            total_expenses,
            average_expense,
            expense_count,
            category_breakdown: categories.iter().map(|(k, t)| (k.clone(), group(t))).collect(),
            currency_breakdown: currencies
                .into_iter()
                .map(|(k, t)| {
                    (
                        k,
                        CurrencyTotal {
                            native_total: t.native,
                            base_total: t.units.to_decimal(dp),
                            count: t.count,
                        },
                    )
                })
                .collect(),
            payer_breakdown: payers.iter().map(|(k, t)| (k.clone(), group(t))).collect(),
            daily_totals: daily
                .into_iter()
                .map(|(day, units)| (day, units.to_decimal(dp)))
                .collect(),
            last_expense_date,
            excluded,
        }
    }

    pub fn excluded_count(&self) -> usize {
        self.excluded.len()
    }

    /// Categories ordered by total, largest first.
    pub fn top_categories(&self) -> Vec<(&str, &GroupTotal)> {
        let mut ranked: Vec<_> = self
            .category_breakdown
            .iter()
            .map(|(k, v)| (k.as_str(), v))
            .collect();
        ranked.sort_by(|a, b| b.1.total.cmp(&a.1.total).then(a.0.cmp(b.0)));
        ranked
    }
}

fn percent_of(part: MinorUnits, whole: MinorUnits) -> f64 {
    if whole.is_zero() {
        return 0.0;
    }
    let pct = Decimal::from(part.value()) * Decimal::from(100) / Decimal::from(whole.value());
    pct.to_f64().unwrap_or(0.0)
}

/// Summarize with the default [`LedgerConfig`].
pub fn summarize(expenses: &[Expense], table: &RateTable, base: &CurrencyCode) -> StatisticsSummary {
    StatisticsSummary::summarize(expenses, table, base, &LedgerConfig::default())
}

impl std::fmt::Display for StatisticsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Trip Statistics ({}) ===", self.base_currency)?;
        writeln!(f, "Total:     {}", self.total_expenses)?;
        writeln!(f, "Expenses:  {}", self.expense_count)?;
        writeln!(f, "Average:   {}", self.average_expense)?;
        if let Some(last) = self.last_expense_date {
            writeln!(f, "Last:      {}", last)?;
        }
        if !self.excluded.is_empty() {
            writeln!(f, "Excluded:  {} expenses", self.excluded.len())?;
        }

        writeln!(f, "\nBy Category:")?;
        for (category, group) in self.top_categories() {
            writeln!(
                f,
                "  {:<14} {:>12} ({} items, {:.1}%)",
                category, group.total, group.count, group.percent
            )?;
        }

        writeln!(f, "\nBy Payer:")?;
        for (payer, group) in &self.payer_breakdown {
            writeln!(f, "  {:<14} {:>12} ({} items)", payer.as_str(), group.total, group.count)?;
        }

        writeln!(f, "\nBy Currency:")?;
        for (currency, t) in &self.currency_breakdown {
            writeln!(
                f,
                "  {}: {} -> {} {}",
                currency, t.native_total, t.base_total, self.base_currency
            )?;
        }

        writeln!(f, "\nDaily:")?;
        for (day, amount) in &self.daily_totals {
            writeln!(f, "  {}  {}", day, amount)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expense::TripId;
    use approx::assert_relative_eq;
    use rust_decimal_macros::dec;

    fn usd() -> CurrencyCode {
        CurrencyCode::new("USD")
    }

    fn table() -> RateTable {
        let mut table = RateTable::new(usd());
        table.insert(CurrencyCode::new("EUR"), dec!(0.5)).unwrap();
        table
    }

    fn expense(payer: &str, amount: Decimal, currency: &str, category: &str, day: u32) -> Expense {
        Expense::new(
            TripId::new("t"),
            ParticipantId::new(payer),
            amount,
            CurrencyCode::new(currency),
        )
        .unwrap()
        .with_category(category)
        .with_date(NaiveDate::from_ymd_opt(2024, 7, day).unwrap())
    }

    #[test]
    fn test_summary_groups() {
        let expenses = vec![
            expense("A", dec!(30), "USD", "food", 1),
            expense("B", dec!(10), "EUR", "transport", 1),
            expense("A", dec!(50), "USD", "lodging", 3),
        ];
        let summary = summarize(&expenses, &table(), &usd());

        assert_eq!(summary.total_expenses, dec!(100));
        assert_eq!(summary.expense_count, 3);
        assert_eq!(summary.average_expense, dec!(33.33));
        assert_eq!(summary.category_breakdown["transport"].total, dec!(20));
        assert_relative_eq!(summary.category_breakdown["lodging"].percent, 50.0);
        assert_eq!(summary.payer_breakdown[&ParticipantId::new("A")].total, dec!(80));
        assert_eq!(summary.payer_breakdown[&ParticipantId::new("A")].count, 2);

        let eur = &summary.currency_breakdown[&CurrencyCode::new("EUR")];
        assert_eq!(eur.native_total, dec!(10));
        assert_eq!(eur.base_total, dec!(20));

        let first = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
        assert_eq!(summary.daily_totals[&first], dec!(50));
        assert_eq!(
            summary.last_expense_date,
            NaiveDate::from_ymd_opt(2024, 7, 3)
        );
    }

    #[test]
    fn test_summary_excludes_unpriced_currency() {
        let expenses = vec![
            expense("A", dec!(30), "USD", "food", 1),
            expense("B", dec!(1000), "ISK", "food", 9),
        ];
        let summary = summarize(&expenses, &table(), &usd());
        assert_eq!(summary.excluded_count(), 1);
        assert_eq!(summary.expense_count, 1);
        assert_eq!(summary.total_expenses, dec!(30));
        assert_eq!(summary.last_expense_date, NaiveDate::from_ymd_opt(2024, 7, 1));
    }

    #[test]
    fn test_summary_excludes_expense_that_overflows_total() {
        let expenses = vec![
            expense("A", dec!(60_000_000_000_000_000), "USD", "lodging", 1),
            expense("B", dec!(60_000_000_000_000_000), "USD", "lodging", 2),
            expense("B", dec!(12), "USD", "food", 2),
        ];
        let summary = summarize(&expenses, &table(), &usd());

        assert_eq!(summary.excluded_count(), 1);
        assert_eq!(summary.excluded[0].expense_id, expenses[1].id());
        assert_eq!(summary.excluded[0].reason, ExclusionReason::Overflow);
        assert_eq!(summary.expense_count, 2);
        assert_eq!(summary.total_expenses, dec!(60_000_000_000_000_012));
        assert_eq!(summary.payer_breakdown[&ParticipantId::new("B")].count, 1);
    }

    #[test]
    fn test_empty_summary() {
        let summary = summarize(&[], &table(), &usd());
        assert_eq!(summary.total_expenses, Decimal::ZERO);
        assert_eq!(summary.average_expense, Decimal::ZERO);
        assert!(summary.last_expense_date.is_none());
        assert!(summary.category_breakdown.is_empty());
    }

    #[test]
    fn test_top_categories_ordering() {
        let expenses = vec![
            expense("A", dec!(5), "USD", "snacks", 1),
            expense("A", dec!(40), "USD", "museum", 1),
            expense("A", dec!(40), "USD", "dinner", 1),
        ];
        let summary = summarize(&expenses, &table(), &usd());
        let order: Vec<&str> = summary.top_categories().iter().map(|(k, _)| *k).collect();
        assert_eq!(order, vec!["dinner", "museum", "snacks"]);
    }

    #[test]
    fn test_summary_serializes() {
        let summary = summarize(&[expense("A", dec!(1), "USD", "food", 2)], &table(), &usd());
        let json = serde_json::to_value(&summary).unwrap();
        assert!(json.get("daily_totals").is_some());
        assert_eq!(json["expense_count"], 1);
    }
}
