//! Trainlog CLI - replay training events into a SQLite log store.
//!
//! Each input batch is treated as one request: it gets its own
//! `LogRecordCache`, which is dropped when the batch is done.

mod ingest;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use trainlog_core::{PersistenceBackend, SqliteBackend, StoreConfig};

#[derive(Parser, Debug)]
#[command(name = "trainlog")]
#[command(about = "Replay training events into a trainlog store")]
struct Args {
    /// SQLite store to write to
    #[arg(long, default_value = StoreConfig::DEFAULT_DB_FILE)]
    db: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record JSON-lines events from a file
    Ingest {
        file: PathBuf,

        /// Events per request (default: the whole file)
        #[arg(long)]
        batch: Option<usize>,
    },
    /// Print row counts per bucket
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let store = SqliteBackend::open(&args.db)
        .with_context(|| format!("Failed to open store {}", args.db.display()))?;
    let backend: Arc<dyn PersistenceBackend> = Arc::new(store);

    match args.command {
        Command::Ingest { file, batch } => {
            info!("Ingesting {} into {}", file.display(), args.db.display());
            let reader = File::open(&file)
                .map(BufReader::new)
                .with_context(|| format!("Failed to open {}", file.display()))?;

            let report = ingest::ingest(reader, backend.clone(), batch)?;
            let stats = backend.stats()?;

            // Summary goes to stdout for scripting
            println!(
                "ingested {} events in {} requests; store holds {} rows",
                report.events(),
                report.requests.len(),
                stats.total_rows
            );
        }
        Command::Stats { json } => {
            let stats = backend.stats()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                for (bucket, rows) in &stats.rows {
                    println!("{:<12} {}", bucket.as_str(), rows);
                }
                println!("{:<12} {}", "total", stats.total_rows);
            }
        }
    }

    Ok(())
}
