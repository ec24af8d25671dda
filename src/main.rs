// QuotaLedger - Main Entry Point
//
// Thin CLI over the library: check, record and inspect per-device quotas
// against a file-backed ledger in a data directory.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quota_ledger::{FileStore, RateLimiter, SystemClock};
use std::path::PathBuf;
use tracing::{debug, Level};
use tracing_subscriber::EnvFilter;

/// QuotaLedger: per-device sliding-window usage accounting
#[derive(Parser, Debug)]
#[command(name = "quota-ledger")]
#[command(version = "0.1.0")]
#[command(about = "Check, record and inspect per-device action quotas", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Directory holding the ledger file (default: QUOTA_LEDGER_DIR or ".")
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check whether one more action is currently permitted
    Check {
        /// Action category (messages, attachments, emails, searches, ...)
        category: String,

        /// Candidate payload size in bytes, for byte-denominated categories
        #[arg(long, default_value_t = 0)]
        size: u64,
    },
    /// Record one performed action and persist the ledger
    Record {
        /// Action category
        category: String,

        /// Payload size in bytes, for byte-denominated categories
        #[arg(long, default_value_t = 0)]
        size: u64,
    },
    /// Show the quota status of a category as JSON
    Status {
        /// Action category
        category: String,
    },
    /// Show current in-window usage for a category
    Usage {
        /// Action category
        category: String,
    },
}

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    // Initialize tracing
    let filter = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(filter.into())
                .from_env_lossy(),
        )
        .init();

    let data_dir = args
        .data_dir
        .or_else(|| std::env::var_os("QUOTA_LEDGER_DIR").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));
    debug!(data_dir = %data_dir.display(), "opening ledger");

    let store = FileStore::in_dir(&data_dir);
    let mut limiter = RateLimiter::new(store, SystemClock);

    match args.command {
        Commands::Check { category, size } => {
            if limiter.can_perform_action(&category, size) {
                println!("allowed");
            } else {
                println!("{}", limiter.limit_message(&category, None));
                std::process::exit(1);
            }
        }
        Commands::Record { category, size } => {
            limiter
                .record_action(&category, size)
                .context("failed to persist ledger")?;
            match limiter.remaining_allowance(&category) {
                Some(remaining) => println!("recorded; {remaining} remaining"),
                None => println!("recorded"),
            }
        }
        Commands::Status { category } => {
            let status = limiter.status(&category);
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Usage { category } => {
            println!("{}", limiter.current_usage(&category));
        }
    }

    Ok(())
}
