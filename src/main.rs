//! trip-ledger CLI
//!
//! Balances, settlements and statistics for a trip described in JSON.
//!
//! # Usage
//!
//! ```bash
//! # Who owes what
//! trip-ledger balances --input trip.json
//!
//! # Who pays whom, in euros, as JSON
//! trip-ledger settle --input trip.json --base EUR --format json
//!
//! # Spending breakdown
//! trip-ledger stats --input trip.json
//!
//! # Generate a random trip for testing
//! trip-ledger generate --participants 6 --expenses 40 --currencies USD,EUR
//! ```

use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fs;
use std::process;
use trip_ledger::config::LedgerConfig;
use trip_ledger::core::currency::CurrencyCode;
use trip_ledger::core::expense::{Expense, Share, ShareSpec, TripId};
use trip_ledger::core::participant::ParticipantId;
use trip_ledger::rates::provider::StaticRateProvider;
use trip_ledger::simulation::generator::{generate_trip, TripConfig};
use trip_ledger::store::{ExpenseStore, InMemoryExpenseStore};
use trip_ledger::trip::{Trip, TripLedger};

fn print_usage() {
    eprintln!(
        r#"trip-ledger — shared trip expenses, balances and settle-up

USAGE:
    trip-ledger <COMMAND> [OPTIONS]

COMMANDS:
    balances    Net balance of every participant
    settle      Fewest payments that settle the trip
    stats       Spending totals by category, payer, currency and day
    generate    Generate a random trip file (for testing)
    help        Show this message

OPTIONS (balances, settle, stats):
    --input <FILE>        Path to JSON trip file
    --base <CODE>         Base currency (default: from file, else inferred)
    --format <FORMAT>     Output format: text (default) or json
    --tolerance <AMOUNT>  Balances within this of zero count as settled

OPTIONS (generate):
    --participants <N>    Number of participants (default: 5)
    --expenses <N>        Number of expenses (default: 20)
    --currencies <LIST>   Comma-separated currency codes (default: USD)
    --seed <N>            Seed for reproducible output
    --output <FILE>       Write to file instead of stdout

EXAMPLES:
    trip-ledger balances --input trip.json
    trip-ledger settle --input trip.json --base EUR --format json
    trip-ledger generate --participants 4 --currencies USD,EUR,JPY --output trip.json"#
    );
}

/// JSON schema for a trip file.
#[derive(serde::Deserialize, serde::Serialize)]
struct TripFile {
    #[serde(default = "default_trip_name")]
    name: String,
    participants: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    base_currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rates: Option<RatesInput>,
    expenses: Vec<ExpenseInput>,
}

fn default_trip_name() -> String {
    "trip".to_string()
}

#[derive(serde::Deserialize, serde::Serialize)]
struct RatesInput {
    base: String,
    rates: BTreeMap<String, Decimal>,
}

#[derive(serde::Deserialize, serde::Serialize)]
struct ExpenseInput {
    payer: String,
    amount: Decimal,
    #[serde(default = "default_currency")]
    currency: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    date: Option<chrono::NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    splits: Option<Vec<SplitInput>>,
}

fn default_currency() -> String {
    "USD".to_string()
}

#[derive(serde::Deserialize, serde::Serialize)]
struct SplitInput {
    participant: String,
    amount: Decimal,
}

#[derive(serde::Serialize)]
struct BalancesOutput {
    base_currency: String,
    balances: BTreeMap<String, Decimal>,
    included: usize,
    excluded: Vec<trip_ledger::core::normalized::Exclusion>,
}

struct Options {
    input: String,
    base: Option<String>,
    format: String,
    tolerance: Option<Decimal>,
}

fn parse_options(args: &[String]) -> Options {
    let mut input_path = None;
    let mut base = None;
    let mut format = "text".to_string();
    let mut tolerance = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--input" => {
                i += 1;
                input_path = Some(args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--input requires a file path");
                    process::exit(1);
                }));
            }
            "--base" => {
                i += 1;
                base = Some(args.get(i).map(|s| s.to_uppercase()).unwrap_or_else(|| {
                    eprintln!("--base requires a currency code");
                    process::exit(1);
                }));
            }
            "--format" => {
                i += 1;
                format = match args.get(i).map(String::as_str) {
                    Some(f @ ("text" | "json")) => f.to_string(),
                    Some(other) => {
                        eprintln!("Unknown format '{}': expected 'text' or 'json'", other);
                        process::exit(1);
                    }
                    None => {
                        eprintln!("--format requires 'text' or 'json'");
                        process::exit(1);
                    }
                };
            }
            "--tolerance" => {
                i += 1;
                tolerance = Some(args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                    eprintln!("--tolerance requires a decimal amount");
                    process::exit(1);
                }));
            }
            _ => {
                eprintln!("Unknown option: {}", args[i]);
                process::exit(1);
            }
        }
        i += 1;
    }

    let input = input_path.unwrap_or_else(|| {
        eprintln!("Error: --input <FILE> is required");
        process::exit(1);
    });

    Options {
        input,
        base,
        format,
        tolerance,
    }
}

fn load_ledger(options: &Options) -> TripLedger {
    let content = fs::read_to_string(&options.input).unwrap_or_else(|e| {
        eprintln!("Error reading file '{}': {}", options.input, e);
        process::exit(1);
    });

    let file: TripFile = serde_json::from_str(&content).unwrap_or_else(|e| {
        eprintln!("Error parsing JSON: {}", e);
        eprintln!("Expected format:");
        eprintln!(r#"{{
  "participants": ["ana", "ben"],
  "rates": {{ "base": "USD", "rates": {{ "EUR": "0.92" }} }},
  "expenses": [
    {{ "payer": "ana", "amount": "42.50", "currency": "EUR", "category": "food" }}
  ]
}}"#);
        process::exit(1);
    });

    let mut config = LedgerConfig::default();
    if let Some(tolerance) = options.tolerance {
        config = config.with_tolerance(tolerance);
    }

    let participants: Vec<ParticipantId> = file.participants.iter().map(ParticipantId::new).collect();
    let creator = participants.first().cloned().unwrap_or_else(|| {
        eprintln!("Error: a trip needs at least one participant");
        process::exit(1);
    });
    let trip_id = TripId::new(file.name.clone());
    let mut trip = participants
        .iter()
        .fold(Trip::new(trip_id.clone(), &file.name, creator), |trip, p| {
            trip.with_participant(p.clone())
        });
    if let Some(base) = options.base.clone().or(file.base_currency.clone()) {
        trip = trip.with_currency(CurrencyCode::new(base.to_uppercase()));
    }

    let mut store = InMemoryExpenseStore::new();
    for (idx, input) in file.expenses.into_iter().enumerate() {
        let expense = build_expense(&trip_id, input).unwrap_or_else(|e| {
            eprintln!("Invalid expense #{}: {}", idx, e);
            process::exit(1);
        });
        store.create_expense(expense).unwrap_or_else(|e| {
            eprintln!("Invalid expense #{}: {}", idx, e);
            process::exit(1);
        });
    }

    let provider = match &file.rates {
        Some(rates) => StaticRateProvider::from_map(CurrencyCode::new(rates.base.to_uppercase()), &rates.rates),
        None => StaticRateProvider::from_pairs(
            trip.currency.clone().unwrap_or_else(|| config.default_currency.clone()),
            Vec::new(),
        ),
    }
    .unwrap_or_else(|e| {
        eprintln!("Invalid rates: {}", e);
        process::exit(1);
    });

    TripLedger::load(trip, &store, &provider, config).unwrap_or_else(|e| {
        eprintln!("Error loading trip: {}", e);
        process::exit(1);
    })
}

fn build_expense(trip_id: &TripId, input: ExpenseInput) -> Result<Expense, Box<dyn std::error::Error>> {
    let mut expense = Expense::new(
        trip_id.clone(),
        ParticipantId::new(&input.payer),
        input.amount,
        CurrencyCode::new(input.currency.to_uppercase()),
    )?;
    if let Some(category) = input.category {
        expense = expense.with_category(category);
    }
    if let Some(description) = input.description {
        expense = expense.with_description(description);
    }
    if let Some(date) = input.date {
        expense = expense.with_date(date);
    }
    let splits = input.splits.map(|splits| {
        splits
            .into_iter()
            .map(|s| Share::new(ParticipantId::new(&s.participant), s.amount))
            .collect()
    });
    if let ShareSpec::Explicit(shares) = ShareSpec::from_splits(splits) {
        expense = expense.with_shares(shares)?;
    }
    Ok(expense)
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| {
        eprintln!("Error serializing output: {}", e);
        process::exit(1);
    })
}

fn cmd_balances(args: &[String]) {
    let options = parse_options(args);
    let ledger = load_ledger(&options);
    let sheet = ledger.balances();

    if options.format == "json" {
        let output = BalancesOutput {
            base_currency: sheet.base_currency().to_string(),
            balances: sheet
                .balances()
                .into_iter()
                .map(|(p, amount)| (p.to_string(), amount))
                .collect(),
            included: sheet.included_count(),
            excluded: sheet.excluded().to_vec(),
        };
        println!("{}", to_json(&output));
    } else {
        println!("=== Balances ({}) ===", sheet.base_currency());
        for (participant, amount) in sheet.balances() {
            let status = if amount > Decimal::ZERO {
                "is owed"
            } else if amount < Decimal::ZERO {
                "owes"
            } else {
                "settled"
            };
            println!("  {:<16} {:>12}  {}", participant.as_str(), amount, status);
        }
        if sheet.excluded_count() > 0 {
            println!("\n{} expense(s) excluded:", sheet.excluded_count());
            for exclusion in sheet.excluded() {
                println!("  {}  {}", exclusion.expense_id, exclusion.reason);
            }
        }
    }
}

fn cmd_settle(args: &[String]) {
    let options = parse_options(args);
    let ledger = load_ledger(&options);
    let settlements = ledger.settlements().unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        process::exit(1);
    });

    if options.format == "json" {
        println!("{}", to_json(&settlements));
    } else if settlements.is_empty() {
        println!("Everyone is settled up.");
    } else {
        println!("=== Settle up ({}) ===", ledger.base_currency());
        for settlement in &settlements {
            println!("  {}", settlement);
        }
        println!("\n{} payment(s)", settlements.len());
    }
}

fn cmd_stats(args: &[String]) {
    let options = parse_options(args);
    let ledger = load_ledger(&options);
    let summary = ledger.summary();

    if options.format == "json" {
        println!("{}", to_json(&summary));
    } else {
        print!("{}", summary);
    }
}

fn cmd_generate(args: &[String]) {
    let mut config = TripConfig::default();
    let mut output_path: Option<String> = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--participants" => {
                i += 1;
                config.participant_count = args
                    .get(i)
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(|| {
                        eprintln!("--participants requires a number");
                        process::exit(1);
                    });
            }
            "--expenses" => {
                i += 1;
                config.expense_count = args
                    .get(i)
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(|| {
                        eprintln!("--expenses requires a number");
                        process::exit(1);
                    });
            }
            "--currencies" => {
                i += 1;
                let list = args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--currencies requires a comma-separated list");
                    process::exit(1);
                });
                config.currencies = list
                    .split(',')
                    .map(|s| CurrencyCode::new(s.trim().to_uppercase()))
                    .collect();
            }
            "--seed" => {
                i += 1;
                config.seed = Some(args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                    eprintln!("--seed requires a number");
                    process::exit(1);
                }));
            }
            "--output" => {
                i += 1;
                output_path = Some(args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--output requires a file path");
                    process::exit(1);
                }));
            }
            _ => {
                eprintln!("Unknown option: {}", args[i]);
                process::exit(1);
            }
        }
        i += 1;
    }

    let generated = generate_trip(&config).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        process::exit(1);
    });

    let file = TripFile {
        name: generated.trip.name.clone(),
        participants: generated.trip.participants.iter().map(|p| p.to_string()).collect(),
        base_currency: generated.trip.currency.as_ref().map(|c| c.to_string()),
        rates: Some(RatesInput {
            base: generated.rates.base().to_string(),
            rates: generated
                .rates
                .currencies()
                .filter_map(|c| generated.rates.rate(c).map(|r| (c.to_string(), r)))
                .collect(),
        }),
        expenses: generated
            .expenses
            .iter()
            .map(|e| ExpenseInput {
                payer: e.payer().to_string(),
                amount: e.amount(),
                currency: e.currency().to_string(),
                category: Some(e.category().to_string()),
                description: None,
                date: e.date(),
                splits: match e.shares() {
                    ShareSpec::Equal => None,
                    ShareSpec::Explicit(shares) => Some(
                        shares
                            .iter()
                            .map(|s| SplitInput {
                                participant: s.participant.to_string(),
                                amount: s.amount,
                            })
                            .collect(),
                    ),
                },
            })
            .collect(),
    };

    let json = to_json(&file);

    if let Some(path) = output_path {
        fs::write(&path, &json).unwrap_or_else(|e| {
            eprintln!("Error writing to '{}': {}", path, e);
            process::exit(1);
        });
        eprintln!(
            "Generated {} expenses across {} participants → {}",
            file.expenses.len(),
            file.participants.len(),
            path
        );
    } else {
        println!("{}", json);
    }
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let command = args[1].as_str();
    let rest = &args[2..];

    match command {
        "balances" => cmd_balances(rest),
        "settle" => cmd_settle(rest),
        "stats" => cmd_stats(rest),
        "generate" => cmd_generate(rest),
        "help" | "--help" | "-h" => print_usage(),
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            process::exit(1);
        }
    }
}
