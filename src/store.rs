//! The expense store the ledger reads from and, during a currency switch,
//! writes re-priced amounts back to.

use crate::core::expense::{Expense, ExpenseError, ExpenseUpdate, TripId};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("expense {0} not found")]
    NotFound(Uuid),
    #[error("expense {0} already exists")]
    Duplicate(Uuid),
    #[error("expense rejected: {0}")]
    Rejected(#[from] ExpenseError),
}

/// Persistence for trip expenses. How rows are stored is up to the
/// implementation.
pub trait ExpenseStore {
    /// All expenses of `trip`, oldest first.
    fn list_expenses(&self, trip: &TripId) -> Result<Vec<Expense>, StoreError>;

    fn create_expense(&mut self, expense: Expense) -> Result<Expense, StoreError>;

    /// Rewrite amount, currency and (optionally) shares of one expense.
    fn update_expense(&mut self, id: Uuid, update: ExpenseUpdate) -> Result<(), StoreError>;
}

/// Store keeping everything in memory, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct InMemoryExpenseStore {
    expenses: Vec<Expense>,
    index: BTreeMap<Uuid, usize>,
}

impl InMemoryExpenseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.expenses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expenses.is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<&Expense> {
        self.index.get(&id).map(|&idx| &self.expenses[idx])
    }
}

impl ExpenseStore for InMemoryExpenseStore {
    fn list_expenses(&self, trip: &TripId) -> Result<Vec<Expense>, StoreError> {
        Ok(self
            .expenses
            .iter()
            .filter(|e| e.trip_id() == trip)
            .cloned()
            .collect())
    }

    fn create_expense(&mut self, expense: Expense) -> Result<Expense, StoreError> {
        if self.index.contains_key(&expense.id()) {
            return Err(StoreError::Duplicate(expense.id()));
        }
        self.index.insert(expense.id(), self.expenses.len());
        self.expenses.push(expense.clone());
        Ok(expense)
    }

    fn update_expense(&mut self, id: Uuid, update: ExpenseUpdate) -> Result<(), StoreError> {
        let idx = *self.index.get(&id).ok_or(StoreError::NotFound(id))?;
        self.expenses[idx].reprice(update)?;
        Ok(())
    }
}
