//! A three-person weekend away, paid in two currencies.
//!
//! Run with `cargo run --example weekend_trip`. Set `RUST_LOG=debug` to see
//! each transfer and re-priced expense.

use rust_decimal_macros::dec;
use trip_ledger::prelude::*;
use trip_ledger::store::InMemoryExpenseStore;
use trip_ledger::trip::TripError;

fn main() -> Result<(), TripError> {
    env_logger::init();

    let ana = ParticipantId::new("ana");
    let ben = ParticipantId::new("ben");
    let cat = ParticipantId::new("cat");
    let usd = CurrencyCode::new("USD");
    let eur = CurrencyCode::new("EUR");

    let provider = StaticRateProvider::from_pairs(usd.clone(), [(eur.clone(), dec!(0.92))])?;
    let trip_id = TripId::new("lisbon-weekend");
    let trip = Trip::new(trip_id.clone(), "Lisbon weekend", ana.clone())
        .with_participant(ben.clone())
        .with_participant(cat.clone())
        .with_currency(usd.clone());

    let mut store = InMemoryExpenseStore::new();
    let mut ledger = TripLedger::load(trip, &store, &provider, LedgerConfig::default())?;

    ledger.record_expense(
        &mut store,
        Expense::new(trip_id.clone(), ana.clone(), dec!(240), usd.clone())?
            .with_category("lodging")
            .with_description("Two nights in Alfama"),
    )?;
    ledger.record_expense(
        &mut store,
        Expense::new(trip_id.clone(), ben.clone(), dec!(73.60), eur.clone())?
            .with_category("food")
            .with_description("Dinner")
            .with_shares(vec![
                Share::new(ben.clone(), dec!(36.80)),
                Share::new(cat.clone(), dec!(36.80)),
            ])?,
    )?;
    ledger.record_expense(
        &mut store,
        Expense::new(trip_id, cat.clone(), dec!(27.60), eur.clone())?.with_category("transport"),
    )?;

    println!("=== Balances ({}) ===", ledger.base_currency());
    for (who, amount) in ledger.balances().balances() {
        println!("  {:<6} {:>10}", who.as_str(), amount);
    }

    println!("\n=== Settle up ===");
    for settlement in ledger.settlements()? {
        println!("  {}", settlement);
    }

    println!("\n{}", ledger.summary());

    let report = ledger.switch_base_currency(&ana, &eur, &provider, &mut store)?;
    println!(
        "Switched {} -> {}: {} re-priced, {} unchanged",
        report.from, report.to, report.repriced, report.unchanged
    );

    println!("\n=== Settle up ({}) ===", ledger.base_currency());
    for settlement in ledger.settlements_for(&cat)? {
        println!("  {}", settlement);
    }

    Ok(())
}
