//! Enrich CLI - Main entry point

mod simulate;
mod store;

use clap::{Parser, Subcommand};
use enrich_core::EnrichmentEngine;
use enrich_foundation::EngineConfig;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Enrich - cached, incremental enrichment of growing data units
#[derive(Parser, Debug)]
#[command(name = "enrich")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Engine configuration file (JSON); defaults to the global config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Inspect or write engine configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Inspect a durable SQLite store
    Store {
        #[command(subcommand)]
        action: StoreAction,
    },
    /// Drive a synthetic workload through the engine
    Simulate {
        /// Number of units
        #[arg(long, default_value = "4")]
        units: usize,
        /// Items per pass
        #[arg(long, default_value = "10")]
        items: usize,
        /// Appends after the first pass
        #[arg(long, default_value = "3")]
        appends: usize,
        /// Simulated analysis time per item
        #[arg(long, default_value = "5")]
        delay_ms: u64,
        /// Persist into this SQLite file instead of the configured path
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write a configuration preset to a file
    Init {
        path: PathBuf,
        /// Preset: default, minimal, performance
        #[arg(long, default_value = "default")]
        preset: String,
    },
}

#[derive(Subcommand, Debug)]
enum StoreAction {
    /// Entry and checkpoint counts
    Stats {
        #[arg(long)]
        db: PathBuf,
    },
    /// Remove all cached results (checkpoints are kept)
    Purge {
        #[arg(long)]
        db: PathBuf,
    },
    /// List unit checkpoints
    Checkpoints {
        #[arg(long)]
        db: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match args.command {
        Command::Config { action } => match action {
            ConfigAction::Show => {
                let config = load_config(args.config.as_ref())?;
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
            ConfigAction::Init { path, preset } => {
                let config = match preset.as_str() {
                    "default" => EngineConfig::default(),
                    "minimal" => EngineConfig::minimal(),
                    "performance" => EngineConfig::performance(),
                    other => anyhow::bail!("unknown preset '{}'", other),
                };
                config.save_to(&path)?;
                println!("Wrote {} config to {}", preset, path.display());
            }
        },
        Command::Store { action } => match action {
            StoreAction::Stats { db } => {
                let summary = store::stats(&db)?;
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
            StoreAction::Purge { db } => {
                let removed = store::purge(&db)?;
                println!("Removed {} cached results", removed);
            }
            StoreAction::Checkpoints { db } => store::print_checkpoints(&db)?,
        },
        Command::Simulate {
            units,
            items,
            appends,
            delay_ms,
            db,
        } => {
            let mut config = load_config(args.config.as_ref())?;
            if let Some(db) = db {
                config = config.with_durable_path(db);
            }

            let engine = EnrichmentEngine::new(config)?;
            let options = simulate::SimulationOptions {
                units,
                items,
                appends,
                delay: Duration::from_millis(delay_ms),
            };
            let report = simulate::run(&engine, &options).await?;
            engine.shutdown().await;

            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::load_from(path)?,
        None => EngineConfig::load_global().unwrap_or_else(|e| {
            eprintln!("Warning: Failed to load config: {}", e);
            EngineConfig::default()
        }),
    };
    Ok(config)
}
