//! TradeStation Feed - Main Entry Point
//!
//! Streams normalized ticks for a set of instruments to stdout, one JSON
//! object per line.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;
use tradestation_feed::broker::TradeStationClient;
use tradestation_feed::config::Config;
use tradestation_feed::feed::{DataQueueHandler, JobContext};
use tradestation_feed::market::{InstrumentId, SecurityType};

/// TradeStation Feed CLI
#[derive(Parser)]
#[command(name = "tradestation-feed")]
#[command(version, about = "Real-time TradeStation quote stream reconciler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream ticks as JSON lines until Ctrl-C
    Stream {
        /// Equity tickers
        #[arg(short, long)]
        equity: Vec<String>,

        /// Underlyings whose full option chain is streamed
        #[arg(short, long)]
        option: Vec<String>,

        /// Futures contracts
        #[arg(short, long)]
        future: Vec<String>,

        /// Job identifier recorded with the subscription
        #[arg(long, default_value = "cli")]
        job_id: String,
    },

    /// Search instruments and print their broker names
    Lookup {
        /// Name pattern, or the underlying for option chains
        pattern: String,

        /// Instrument class to search
        #[arg(short, long, value_enum, default_value = "equity")]
        class: InstrumentClass,
    },

    /// Load and validate configuration, then print it
    CheckConfig,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum InstrumentClass {
    Equity,
    Option,
    Future,
}

impl From<InstrumentClass> for SecurityType {
    fn from(class: InstrumentClass) -> Self {
        match class {
            InstrumentClass::Equity => SecurityType::Equity,
            InstrumentClass::Option => SecurityType::Option,
            InstrumentClass::Future => SecurityType::Future,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let config = Config::load()?;

    match cli.command {
        Commands::Stream {
            equity,
            option,
            future,
            job_id,
        } => {
            let instruments: Vec<InstrumentId> = equity
                .iter()
                .map(InstrumentId::equity)
                .chain(option.iter().map(InstrumentId::option_chain))
                .chain(future.iter().map(InstrumentId::future))
                .collect();
            run_stream(config, JobContext::new(job_id), instruments).await
        }
        Commands::Lookup { pattern, class } => run_lookup(config, &pattern, class.into()).await,
        Commands::CheckConfig => check_config(&config),
    }
}

async fn run_stream(config: Config, job: JobContext, instruments: Vec<InstrumentId>) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    anyhow::ensure!(!instruments.is_empty(), "nothing to stream; pass --equity, --option or --future");

    info!(
        "📡 TradeStation Feed v{} starting ({} instruments requested)",
        env!("CARGO_PKG_VERSION"),
        instruments.len()
    );

    let client = TradeStationClient::new(&config.broker).context("Failed to build broker client")?;
    let handler = DataQueueHandler::new(Arc::new(client), &config);
    let mut ticks = handler
        .ticks()
        .context("Tick stream already taken")?;

    let added = handler.subscribe(&job, &instruments).await;
    if added == 0 {
        warn!("No requested instrument could be resolved");
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("🛑 Shutdown signal received");
                break;
            }
            tick = ticks.next_tick() => match tick {
                Some(tick) => println!("{}", serde_json::to_string(&tick)?),
                None => {
                    if !handler.is_connected() {
                        error!("Quote stream ended: broker disconnected the session");
                    }
                    break;
                }
            },
        }
    }

    handler.disconnect().await;

    let stats = handler.stats();
    info!(
        "👋 Done: {} ticks from {} frames over {} sessions",
        stats.ticks_emitted, stats.frames_received, stats.sessions_opened
    );
    Ok(())
}

async fn run_lookup(config: Config, pattern: &str, security_type: SecurityType) -> Result<()> {
    config.validate().context("Invalid configuration")?;

    let client = TradeStationClient::new(&config.broker).context("Failed to build broker client")?;
    let handler = DataQueueHandler::new(Arc::new(client), &config);

    let instruments = handler
        .lookup_symbols(pattern, security_type)
        .await
        .with_context(|| format!("Failed to look up {} ({})", pattern, security_type))?;

    info!("Found {} instruments for {}", instruments.len(), pattern);
    for instrument in &instruments {
        match handler.to_broker_name(instrument).await {
            Ok(name) => println!("{}\t{}", instrument, name),
            Err(e) => println!("{}\t<{}>", instrument, e),
        }
    }

    handler.disconnect().await;
    Ok(())
}

fn check_config(config: &Config) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    println!("{}", serde_json::to_string_pretty(&config.redacted())?);
    info!("✅ Configuration OK");
    Ok(())
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "tradestation-feed.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("tradestation_feed=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        // Ticks own stdout; logs go to stderr and the file
        .with_writer(std::io::stderr.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_class_maps_to_security_type() {
        let cli = Cli::try_parse_from(["tradestation-feed", "lookup", "SPY", "--class", "option"]).unwrap();
        match cli.command {
            Commands::Lookup { pattern, class } => {
                assert_eq!(pattern, "SPY");
                assert_eq!(SecurityType::from(class), SecurityType::Option);
            }
            _ => panic!("expected lookup"),
        }

        assert!(Cli::try_parse_from(["tradestation-feed", "lookup", "SPY", "--class", "bond"]).is_err());
    }
}
