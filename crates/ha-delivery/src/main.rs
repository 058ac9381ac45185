// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HA Delivery CLI
//!
//! Reads line protocol from stdin and delivers it through the resilient
//! engine, and inspects or replays the overflow store.
//!
//! # Usage
//!
//! ```bash
//! # Forward stdin to InfluxDB
//! producer | ha-delivery --config delivery.toml run --status-interval 30
//!
//! # Dry run against an in-process sink
//! producer | ha-delivery --mock --db /tmp/overflow.db
//!
//! # Overflow maintenance
//! ha-delivery --db overflow.db stats
//! ha-delivery --db overflow.db list --limit 10
//! ha-delivery --config delivery.toml drain
//! ha-delivery --db overflow.db clear --confirm
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ha_delivery::{
    DeliveryConfig, InfluxSink, MockSink, OverflowStore, ResilientSink, SinkClient,
    SqliteOverflowStore,
};
use ha_measurement::Measurement;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Upper bound for draining the queue after input ends.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "ha-delivery")]
#[command(about = "Store-and-forward delivery of measurements to InfluxDB", long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overflow database path (overrides the configuration)
    #[arg(long)]
    db: Option<String>,

    /// Use an in-process sink that accepts everything
    #[arg(long)]
    mock: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Deliver line protocol read from stdin (default)
    Run {
        /// Seconds between status log lines
        #[arg(long, default_value_t = 60)]
        status_interval: u64,
    },
    /// Show overflow statistics
    Stats,
    /// List stored overflow records
    List {
        /// Maximum number of records to print
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Replay the overflow store once
    Drain,
    /// Delete all overflow records
    Clear {
        /// Confirm deletion
        #[arg(long)]
        confirm: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = DeliveryConfig::load(args.config.as_deref())?;
    if let Some(db) = &args.db {
        config.overflow.path = db.clone();
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    let store = Arc::new(SqliteOverflowStore::new(&config.overflow.path)?);

    let command = args.command.unwrap_or(Commands::Run {
        status_interval: 60,
    });

    match command {
        Commands::Stats => {
            let count = store.count()?;
            println!("Overflow database: {}", config.overflow.path);
            println!("Stored measurements: {}", count);
            if let Some(oldest) = store.all()?.first() {
                println!("Oldest record: {}", oldest.created_at.to_rfc3339());
            }
        }
        Commands::List { limit } => {
            let records = store.all()?;
            println!("{} stored measurements:", records.len());
            for record in records.iter().take(limit) {
                println!(
                    "  #{} {} {}",
                    record.id,
                    record.created_at.to_rfc3339(),
                    record.payload
                );
            }
        }
        Commands::Clear { confirm } => {
            if confirm {
                let removed = store.clear()?;
                println!("{} stored measurements cleared.", removed);
            } else {
                println!("Use --confirm to actually delete stored measurements.");
            }
        }
        Commands::Drain => {
            if args.mock {
                drain(&config, Arc::new(MockSink::new()), store)?;
            } else {
                config.validate()?;
                let sink = Arc::new(InfluxSink::new(&config.influxdb)?);
                drain(&config, sink, store)?;
            }
        }
        Commands::Run { status_interval } => {
            let interval = Duration::from_secs(status_interval.max(1));
            if args.mock {
                tracing::info!("Running with mock sink");
                config.engine.validate()?;
                run(&config, Arc::new(MockSink::new()), store, interval)?;
            } else {
                config.validate()?;
                tracing::info!(
                    url = %config.influxdb.url,
                    org = %config.influxdb.org,
                    bucket = %config.influxdb.bucket,
                    "Running with InfluxDB sink"
                );
                let sink = Arc::new(InfluxSink::new(&config.influxdb)?);
                run(&config, sink, store, interval)?;
            }
        }
    }

    Ok(())
}

fn drain<S>(config: &DeliveryConfig, sink: Arc<S>, store: Arc<SqliteOverflowStore>) -> Result<()>
where
    S: SinkClient + 'static,
{
    let engine = ResilientSink::new(config.engine.to_engine_config(), sink, store)?;
    match engine.recover() {
        Some(report) => println!("Recovery {}", report),
        None => println!("A recovery pass is already running."),
    }
    engine.shutdown();
    Ok(())
}

fn run<S>(
    config: &DeliveryConfig,
    sink: Arc<S>,
    store: Arc<SqliteOverflowStore>,
    status_interval: Duration,
) -> Result<()>
where
    S: SinkClient + 'static,
{
    let engine = ResilientSink::new(config.engine.to_engine_config(), sink, store)?;
    tracing::info!(
        overflow = %config.overflow.path,
        "HA delivery running, reading line protocol from stdin"
    );

    // The blocking HTTP client must stay outside the async context, so the
    // runtime only drives stdin, the heartbeat and Ctrl-C.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    let pumped = runtime.block_on(pump_stdin(&engine, status_interval));
    runtime.shutdown_background();
    pumped?;

    if !engine.wait_idle(IDLE_TIMEOUT) {
        tracing::warn!(
            queued = engine.queue_count(),
            "queue not drained in time, spilling to overflow"
        );
    }
    engine.shutdown();
    Ok(())
}

async fn pump_stdin<S, O>(engine: &ResilientSink<S, O>, status_interval: Duration) -> Result<()>
where
    S: SinkClient + 'static,
    O: OverflowStore + 'static,
{
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut heartbeat = tokio::time::interval(status_interval);
    heartbeat.tick().await;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut accepted = 0u64;
    let mut rejected = 0u64;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    tracing::info!(accepted, rejected, "End of input");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match Measurement::from_line_protocol(&line) {
                    Ok(measurement) => {
                        engine.enqueue(measurement);
                        accepted += 1;
                    }
                    Err(e) => {
                        rejected += 1;
                        tracing::warn!(error = %e, line = %line, "Skipping undecodable line");
                    }
                }
            }
            _ = heartbeat.tick() => {
                tracing::info!(status = %engine.status(), "Heartbeat");
            }
            _ = &mut ctrl_c => {
                tracing::info!("Interrupted, shutting down");
                break;
            }
        }
    }

    Ok(())
}
