//! # trip-ledger
//!
//! Shared expense ledger and settlement engine for group trips.
//!
//! Travelers log expenses in whatever currency they paid in. The ledger
//! normalizes them into one base currency, works out each participant's net
//! balance, and proposes the fewest peer-to-peer payments that settle
//! everyone up.
//!
//! ## Architecture
//!
//! - **core** — Foundational types: money, currencies, participants, expenses, ledger
//! - **rates** — Rate providers and the rate book that sequences fetches
//! - **settlement** — Balance aggregation and the settlement solver
//! - **statistics** — Spending breakdowns over the same normalized expenses
//! - **store** — The expense store boundary
//! - **trip** — A trip's ledger view and the base-currency switch
//! - **simulation** — Random trip generation

pub mod config;
pub mod core;
pub mod rates;
pub mod settlement;
pub mod simulation;
pub mod statistics;
pub mod store;
pub mod trip;

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::config::LedgerConfig;
    pub use crate::core::currency::{normalize, CurrencyCode, RateTable};
    pub use crate::core::expense::{Expense, Share, ShareSpec, TripId};
    pub use crate::core::ledger::Ledger;
    pub use crate::core::participant::ParticipantId;
    pub use crate::rates::provider::{RateProvider, StaticRateProvider};
    pub use crate::settlement::aggregator::{aggregate, BalanceSheet};
    pub use crate::settlement::solver::{settle, Settlement, SettlementError};
    pub use crate::statistics::summary::{summarize, StatisticsSummary};
    pub use crate::trip::{Trip, TripLedger};
}
