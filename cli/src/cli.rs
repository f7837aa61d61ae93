use std::fmt::Write as _;

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::info;

use arbitrage::ArbitrageConfig;
use common::BatchId;
use ledger::store::sqlite_store::SQLiteFundStore;
use ledger::{FundLedger, FundRecord};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://arb_ledger.db";

#[derive(Debug, Parser)]
#[clap(name = "arbctl", version, about = "Inspect and reconcile the arbitrage fund ledger")]
pub struct Cli {
    /// Ledger database; falls back to DATABASE_URL
    #[clap(long, global = true)]
    pub database_url: Option<String>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Positions currently open
    Open,
    /// Batches that need manual reconciliation
    Failed,
    /// One batch in full
    Show { batch: BatchId },
    /// Mark a failed batch as unwound by hand
    Resolve {
        batch: BatchId,
        #[clap(long)]
        note: String,
    },
    /// Validate the coordinator configuration from the environment
    Config,
}

pub async fn run(command: Command, database_url: &str) -> anyhow::Result<()> {
    if let Command::Config = command {
        let cfg = ArbitrageConfig::from_env()?;
        println!(
            "tick={}ms staleness={}ms pairs={}",
            cfg.tick_interval.as_millis(),
            cfg.depth_staleness.as_millis(),
            cfg.pairs.len()
        );
        for t in &cfg.pairs {
            println!(
                "{} {}/{} -> {}/{} open>{}% close<{}% stop>{}% amount={} slippage={}",
                t.pair,
                t.legs[0].venue,
                t.legs[0].kind,
                t.legs[1].venue,
                t.legs[1].kind,
                t.open_threshold,
                t.close_threshold,
                t.limit_close,
                t.amount,
                t.slippage_limit
            );
        }
        return Ok(());
    }

    let store = SQLiteFundStore::new(database_url).await?;
    let ledger = FundLedger::new(std::sync::Arc::new(store));

    match command {
        Command::Open => print_records(&ledger.open_records().await?),
        Command::Failed => print_records(&ledger.failed_positions().await?),
        Command::Show { batch } => match ledger.get(batch).await? {
            Some(record) => println!("{}", format_record(&record)),
            None => anyhow::bail!("No fund record for batch {}", batch),
        },
        Command::Resolve { batch, note } => {
            let record = ledger.resolve(batch, note).await?;
            info!(component = "cli", event = "resolved", batch_id = %batch);
            println!("{}", format_record(&record));
        }
        Command::Config => {}
    }

    Ok(())
}

fn print_records(records: &[FundRecord]) {
    if records.is_empty() {
        println!("(none)");
    }
    for r in records {
        println!("{}", format_record(r));
    }
}

fn join<T: std::fmt::Display>(values: &[T]) -> String {
    values.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(",")
}

/// One line per record: identity, then per-leg detail.
pub fn format_record(r: &FundRecord) -> String {
    let mut out = format!("{} {} {} updated={}", r.batch, r.pair, r.status, r.updated_at_ms);

    for i in 0..r.venues.len() {
        let _ = write!(
            out,
            " | {} {} {} open {}@{}",
            r.venues[i],
            r.leg_types.get(i).map(|k| k.to_string()).unwrap_or_default(),
            r.sides.get(i).map(|s| s.to_string()).unwrap_or_default(),
            r.open_amounts.get(i).copied().unwrap_or(Decimal::ZERO),
            r.open_prices.get(i).copied().unwrap_or(Decimal::ZERO),
        );
        if let (Some(amount), Some(price)) = (r.close_amounts.get(i), r.close_prices.get(i)) {
            let _ = write!(out, " close {}@{}", amount, price);
        }
    }

    if r.is_closed() {
        let _ = write!(out, " | pnl={} [{}]", r.total_pnl(), join(&r.realized_pnl()));
    }
    if let Some(note) = &r.note {
        let _ = write!(out, " | note: {}", note);
    }
    out
}
