//! Datalogger Maintenance Binary
//!
//! Inspects and maintains an existing datalogger store. Core functionality is
//! provided by the `datalogger` library crate.

use std::path::Path;

use clap::{Parser, Subcommand};
use datalogger::{
    config::{AppConfig, parse_duration},
    retention::{Clock, RetentionPolicy, SystemClock},
    storage::StorageEngine,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Datalogger - Embedded Time-Series Logger
#[derive(Parser, Debug)]
#[command(name = "datalogger", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/datalogger.yaml",
        env = "DATALOGGER_CONFIG"
    )]
    config: String,

    /// Storage location (overrides config file)
    #[arg(long, env = "DATALOGGER_LOCATION")]
    location: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List registered channels
    Channels,

    /// Print the records of one channel as JSON lines
    Query {
        /// Channel identifier
        #[arg(long)]
        channel: String,

        /// Range start in epoch milliseconds (inclusive)
        #[arg(long, default_value_t = 0)]
        start: i64,

        /// Range end in epoch milliseconds (inclusive, default: now)
        #[arg(long)]
        end: Option<i64>,
    },

    /// Delete records older than the retention window
    Purge {
        /// Age threshold (overrides the configured window), e.g. `7d`
        #[arg(long, env = "DATALOGGER_RETENTION_WINDOW")]
        older_than: Option<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,datalogger=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // A missing config file is not an error for a maintenance tool.
    let mut config = if Path::new(&cli.config).exists() {
        tracing::info!("Loading configuration from: {}", cli.config);
        AppConfig::load(&cli.config)?
    } else {
        tracing::debug!("No configuration at {}, using defaults", cli.config);
        AppConfig::default()
    };

    // CLI > ENV > config file
    if let Some(location) = cli.location {
        config.database.location = location;
        config.validate()?;
    }

    let location = config.database.resolved_location();
    let engine = StorageEngine::open(&location)?;

    let result = run(&engine, &config, cli.command);
    engine.disconnect()?;
    result
}

fn run(
    engine: &StorageEngine,
    config: &AppConfig,
    command: Command,
) -> Result<(), Box<dyn std::error::Error>> {
    let now = SystemClock.now_millis();

    match command {
        Command::Channels => {
            for registered in engine.channels()? {
                let channel = &registered.channel;
                let unit = if channel.unit.is_empty() { "-" } else { &channel.unit };
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    channel.id,
                    channel.value_type,
                    unit,
                    registered.last_registration.to_rfc3339(),
                    channel.description,
                );
            }
        }
        Command::Query {
            channel,
            start,
            end,
        } => {
            let end = end.unwrap_or(now);
            for record in engine.get_records(&channel, start, end)? {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
        Command::Purge { older_than } => {
            let window = match older_than {
                Some(s) => parse_duration(&s)?,
                None => config.retention.window,
            };
            if window.is_zero() {
                tracing::warn!("Retention window is zero, nothing to purge");
                return Ok(());
            }

            let cutoff = RetentionPolicy::new(window).cutoff(now);
            let summary = engine.delete_records_before(cutoff)?;
            tracing::info!(
                deleted = summary.deleted,
                failed_regions = summary.failures.len(),
                cutoff,
                "Purge complete"
            );
            println!("{}", summary.deleted);
        }
    }

    Ok(())
}
