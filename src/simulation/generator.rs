//! Random trip generation for benchmarks, property checks and the CLI
//! `generate` command.

use crate::core::currency::{CurrencyCode, RateError, RateTable};
use crate::core::expense::{Expense, ExpenseError, Share, TripId};
use crate::core::participant::ParticipantId;
use crate::trip::Trip;
use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

const CATEGORIES: [&str; 6] = ["food", "lodging", "transport", "activities", "shopping", "other"];

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("a trip needs at least one participant")]
    NoParticipants,
    #[error("a trip needs at least one currency")]
    NoCurrencies,
    #[error(transparent)]
    Rate(#[from] RateError),
    #[error(transparent)]
    Expense(#[from] ExpenseError),
}

/// Shape of a generated trip.
#[derive(Debug, Clone)]
pub struct TripConfig {
    pub participant_count: usize,
    pub expense_count: usize,
    /// The first currency is the rate-table anchor.
    pub currencies: Vec<CurrencyCode>,
    /// Amounts are drawn in whole minor units between these bounds.
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    /// Probability that an expense carries explicit shares.
    pub explicit_share_ratio: f64,
    pub start_date: NaiveDate,
    pub days: i64,
    /// Fixed seed for reproducible output.
    pub seed: Option<u64>,
}

impl Default for TripConfig {
    fn default() -> Self {
        Self {
            participant_count: 5,
            expense_count: 20,
            currencies: vec![CurrencyCode::new("USD")],
            min_amount: Decimal::from(5),
            max_amount: Decimal::from(500),
            explicit_share_ratio: 0.25,
            start_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap_or(NaiveDate::MIN),
            days: 7,
            seed: None,
        }
    }
}

/// A generated trip with its expenses and a rate table covering every
/// currency used.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedTrip {
    pub trip: Trip,
    pub rates: RateTable,
    pub expenses: Vec<Expense>,
}

pub fn generate_trip(config: &TripConfig) -> Result<GeneratedTrip, GenerateError> {
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let participants: Vec<ParticipantId> = (0..config.participant_count)
        .map(|i| ParticipantId::new(format!("P{:03}", i)))
        .collect();
    let creator = participants.first().cloned().ok_or(GenerateError::NoParticipants)?;
    let anchor = config.currencies.first().cloned().ok_or(GenerateError::NoCurrencies)?;

    let trip_id = TripId::new(format!("trip-{:08x}", rng.gen::<u32>()));
    let trip = participants
        .iter()
        .skip(1)
        .fold(Trip::new(trip_id.clone(), "Generated trip", creator), |trip, p| {
            trip.with_participant(p.clone())
        })
        .with_currency(anchor.clone());

    let mut rates = RateTable::new(anchor);
    for currency in config.currencies.iter().skip(1) {
        // 0.10 .. 200.00 units per anchor unit
        let rate = Decimal::new(rng.gen_range(10..20_000), 2);
        rates.insert(currency.clone(), rate)?;
    }

    let min_units = to_units(config.min_amount).max(1);
    let max_units = to_units(config.max_amount).max(min_units + 1);

    let mut expenses = Vec::with_capacity(config.expense_count);
    for _ in 0..config.expense_count {
        let payer = participants[rng.gen_range(0..participants.len())].clone();
        let currency = config.currencies[rng.gen_range(0..config.currencies.len())].clone();
        let amount = Decimal::new(rng.gen_range(min_units..max_units), 2);
        let category = CATEGORIES[rng.gen_range(0..CATEGORIES.len())];
        let date = config.start_date + Duration::days(rng.gen_range(0..config.days.max(1)));

        let mut expense = Expense::new(trip_id.clone(), payer, amount, currency)?
            .with_category(category)
            .with_date(date);

        if rng.gen_bool(config.explicit_share_ratio.clamp(0.0, 1.0)) {
            let count = rng.gen_range(1..=participants.len());
            let holders: Vec<&ParticipantId> = participants.choose_multiple(&mut rng, count).collect();
            expense = expense.with_shares(split_randomly(&mut rng, amount, &holders))?;
        }
        expenses.push(expense);
    }

    Ok(GeneratedTrip { trip, rates, expenses })
}

fn to_units(amount: Decimal) -> i64 {
    use rust_decimal::prelude::ToPrimitive;
    (amount * Decimal::from(100)).trunc().to_i64().unwrap_or(0)
}

/// Random shares in whole cents that add up to `amount` exactly.
fn split_randomly(rng: &mut StdRng, amount: Decimal, holders: &[&ParticipantId]) -> Vec<Share> {
    let total = to_units(amount);
    let mut left = total;
    let mut shares = Vec::with_capacity(holders.len());
    for (i, holder) in holders.iter().enumerate() {
        let part = if i + 1 == holders.len() {
            left
        } else {
            rng.gen_range(0..=left)
        };
        left -= part;
        shares.push(Share::new((*holder).clone(), Decimal::new(part, 2)));
    }
    shares
}
