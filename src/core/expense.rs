use crate::core::currency::CurrencyCode;
use crate::core::participant::ParticipantId;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Identifier of a trip, as assigned by the expense store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TripId(String);

impl TripId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TripId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TripId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpenseError {
    #[error("expense amount must not be negative, got {0}")]
    NegativeAmount(Decimal),
    #[error("share for {participant} must not be negative, got {amount}")]
    NegativeShare {
        participant: ParticipantId,
        amount: Decimal,
    },
}

/// One participant's part of an explicitly split expense, in the expense's
/// own currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Share {
    pub participant: ParticipantId,
    pub amount: Decimal,
}

impl Share {
    pub fn new(participant: ParticipantId, amount: Decimal) -> Self {
        Self {
            participant,
            amount,
        }
    }
}

/// Who consumed an expense.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "shares", rename_all = "snake_case")]
pub enum ShareSpec {
    /// Split evenly across the participant set known at aggregation time.
    #[default]
    Equal,
    /// Split by the listed amounts, in order.
    Explicit(Vec<Share>),
}

impl ShareSpec {
    /// Resolve an optional split list: no list means an equal split.
    pub fn from_splits(splits: Option<Vec<Share>>) -> Self {
        match splits {
            Some(shares) => Self::Explicit(shares),
            None => Self::Equal,
        }
    }

    pub fn is_equal(&self) -> bool {
        matches!(self, Self::Equal)
    }
}

/// A shared trip expense paid by one participant.
///
/// # Examples
///
/// ```
/// use trip_ledger::core::expense::{Expense, TripId};
/// use trip_ledger::core::participant::ParticipantId;
/// use trip_ledger::core::currency::CurrencyCode;
/// use rust_decimal_macros::dec;
///
/// let dinner = Expense::new(
///     TripId::new("lisbon-2024"),
///     ParticipantId::new("ana"),
///     dec!(84.50),
///     CurrencyCode::new("EUR"),
/// )
/// .unwrap()
/// .with_category("food");
///
/// assert_eq!(dinner.amount(), dec!(84.50));
/// assert!(dinner.shares().is_equal());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    id: Uuid,
    trip_id: TripId,
    payer: ParticipantId,
    amount: Decimal,
    currency: CurrencyCode,
    category: String,
    description: String,
    date: Option<NaiveDate>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    shares: ShareSpec,
}

impl Expense {
    pub fn new(
        trip_id: TripId,
        payer: ParticipantId,
        amount: Decimal,
        currency: CurrencyCode,
    ) -> Result<Self, ExpenseError> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(ExpenseError::NegativeAmount(amount));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            trip_id,
            payer,
            amount,
            currency,
            category: "other".to_string(),
            description: String::new(),
            date: None,
            created_at: Utc::now(),
            shares: ShareSpec::Equal,
        })
    }

    /// Fix the id (useful for testing / determinism).
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Split explicitly. Shares are checked for sign here; whether they add
    /// up to the amount is judged at aggregation time.
    pub fn with_shares(mut self, shares: Vec<Share>) -> Result<Self, ExpenseError> {
        validate_shares(&shares)?;
        self.shares = ShareSpec::Explicit(shares);
        Ok(self)
    }

    /// Rewrite amount, currency and explicit shares. This is the only
    /// mutation an expense goes through after creation.
    pub fn reprice(&mut self, update: ExpenseUpdate) -> Result<(), ExpenseError> {
        if update.amount.is_sign_negative() && !update.amount.is_zero() {
            return Err(ExpenseError::NegativeAmount(update.amount));
        }
        if let Some(shares) = &update.shares {
            validate_shares(shares)?;
        }
        self.amount = update.amount;
        self.currency = update.currency;
        if let Some(shares) = update.shares {
            self.shares = ShareSpec::Explicit(shares);
        }
        Ok(())
    }

    // --- Accessors ---

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn trip_id(&self) -> &TripId {
        &self.trip_id
    }

    pub fn payer(&self) -> &ParticipantId {
        &self.payer
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> &CurrencyCode {
        &self.currency
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn date(&self) -> Option<NaiveDate> {
        self.date
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The calendar day the expense belongs to: its own date, or the UTC
    /// day it was recorded.
    pub fn day(&self) -> NaiveDate {
        self.date.unwrap_or_else(|| self.created_at.date_naive())
    }

    pub fn shares(&self) -> &ShareSpec {
        &self.shares
    }
}

fn validate_shares(shares: &[Share]) -> Result<(), ExpenseError> {
    for share in shares {
        if share.amount.is_sign_negative() && !share.amount.is_zero() {
            return Err(ExpenseError::NegativeShare {
                participant: share.participant.clone(),
                amount: share.amount,
            });
        }
    }
    Ok(())
}

/// A partial rewrite of an expense, as sent to the store when the trip's
/// base currency changes. `shares: None` leaves an equal split untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseUpdate {
    pub amount: Decimal,
    pub currency: CurrencyCode,
    pub shares: Option<Vec<Share>>,
}

/// An ordered collection of expenses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpenseSet {
    expenses: Vec<Expense>,
}

impl ExpenseSet {
    pub fn new() -> Self {
        Self {
            expenses: Vec::new(),
        }
    }

    pub fn add(&mut self, expense: Expense) {
        self.expenses.push(expense);
    }

    pub fn expenses(&self) -> &[Expense] {
        &self.expenses
    }

    pub fn expenses_mut(&mut self) -> &mut [Expense] {
        &mut self.expenses
    }

    pub fn len(&self) -> usize {
        self.expenses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expenses.is_empty()
    }
}

impl FromIterator<Expense> for ExpenseSet {
    fn from_iter<T: IntoIterator<Item = Expense>>(iter: T) -> Self {
        Self {
            expenses: iter.into_iter().collect(),
        }
    }
}
