pub mod currency;
pub mod expense;
pub mod ledger;
pub mod money;
pub mod normalized;
pub mod participant;
