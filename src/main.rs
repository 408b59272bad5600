mod database;
mod generator;
mod harness;
mod workload;

use crate::database::StoreKind;
use crate::harness::Harness;
use crate::workload::{InitMode, RetryPolicy, WorkloadSpec};
use anyhow::Result;
use clap::error::ErrorKind;
use clap::{Parser, value_parser};
use std::process::ExitCode;

/// Measures sustained insert throughput of a transactional store under
/// concurrent writers.
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Rows to insert across all threads
    #[arg(value_parser = value_parser!(u64).range(1..))]
    total_rows: u64,

    /// Rows inserted by each transaction
    #[arg(value_parser = value_parser!(u64).range(1..))]
    rows_per_txn: u64,

    /// Concurrent writer threads
    #[arg(value_parser = value_parser!(u64).range(1..))]
    thread_count: u64,

    /// When each thread opens its store session
    #[arg(value_enum, default_value_t = InitMode::Eager)]
    init_mode: InitMode,

    #[arg(long, value_enum, default_value_t = StoreKind::MemBtree)]
    store: StoreKind,

    #[arg(long, default_value = "bench")]
    table: String,

    /// Prepare every transaction before committing it
    #[arg(long)]
    two_phase: bool,

    /// Give up when a batch conflicts more than this many times
    #[arg(long, value_parser = value_parser!(u64).range(1..))]
    max_retries: Option<u64>,

    /// Count the stored rows after the run and fail on a mismatch
    #[arg(long)]
    verify: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.exit()
        }
        Err(e) => {
            println!("{e}");
            std::process::exit(-1);
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("error: {e:#}");
            std::process::exit(-1);
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut spec = WorkloadSpec::new(
        cli.total_rows,
        cli.rows_per_txn,
        cli.thread_count,
        cli.init_mode,
    )?;
    spec.two_phase = cli.two_phase;
    if let Some(max) = cli.max_retries {
        spec.retry = RetryPolicy::Bounded(max);
    }

    println!("=== CONFIG ===");
    println!("store: {:?} | table: {} | {}", cli.store, cli.table, spec);

    let harness = Harness {
        spec,
        store: cli.store,
        table: cli.table,
        verify: cli.verify,
    };
    let result = harness.run()?;
    println!("{}", result);
    Ok(())
}
