use crate::core::money::MinorUnits;
use crate::core::participant::ParticipantId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    #[error("position of {participant} would leave the representable range")]
    Overflow { participant: ParticipantId },
}

/// Running net position of each participant, in minor units of the base
/// currency.
///
/// A positive position means the participant is owed money.
/// A negative position means the participant owes money.
///
/// Positions are keyed in id order so iteration, and anything derived from
/// it, is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    positions: BTreeMap<ParticipantId, MinorUnits>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure `participant` has a position, even if it stays at zero.
    pub fn open(&mut self, participant: &ParticipantId) {
        self.positions
            .entry(participant.clone())
            .or_insert(MinorUnits::ZERO);
    }

    /// Credit `payer` with `amount` and debit each share holder by their
    /// share. All or nothing: if any position would overflow, the ledger is
    /// left untouched.
    pub fn post(
        &mut self,
        payer: &ParticipantId,
        amount: MinorUnits,
        debits: &[(&ParticipantId, MinorUnits)],
    ) -> Result<(), LedgerError> {
        let overflow = |participant: &ParticipantId| LedgerError::Overflow {
            participant: participant.clone(),
        };

        let mut staged: BTreeMap<ParticipantId, MinorUnits> = BTreeMap::new();
        let credited = self
            .position(payer)
            .checked_add(amount)
            .ok_or_else(|| overflow(payer))?;
        staged.insert(payer.clone(), credited);
        for (participant, share) in debits {
            let current = staged
                .get(*participant)
                .copied()
                .unwrap_or_else(|| self.position(participant));
            let debited = current
                .checked_sub(*share)
                .ok_or_else(|| overflow(*participant))?;
            staged.insert((*participant).clone(), debited);
        }

        self.positions.extend(staged);
        Ok(())
    }

    pub fn position(&self, participant: &ParticipantId) -> MinorUnits {
        self.positions
            .get(participant)
            .copied()
            .unwrap_or(MinorUnits::ZERO)
    }

    pub fn positions(&self) -> &BTreeMap<ParticipantId, MinorUnits> {
        &self.positions
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Sum of every position, `None` if it cannot be represented. Zero for
    /// any ledger built from expenses.
    pub fn total(&self) -> Option<MinorUnits> {
        MinorUnits::checked_sum(self.positions.values().copied())
    }

    pub fn is_balanced(&self) -> bool {
        self.total() == Some(MinorUnits::ZERO)
    }

    /// Positions as decimals with `decimal_places` places.
    pub fn to_decimals(&self, decimal_places: u32) -> BTreeMap<ParticipantId, Decimal> {
        self.positions
            .iter()
            .map(|(p, v)| (p.clone(), v.to_decimal(decimal_places)))
            .collect()
    }
}
