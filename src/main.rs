//! Energy Usage Monitoring Service - Main Daemon
//!
//! A server-side daemon that periodically:
//! 1. Signs in to the utility's customer portal
//! 2. Checks the last few days of hourly usage statistics for gaps
//! 3. Backfills missing days with a monotonic cumulative sum
//! 4. Records polling health and serves it over an optional HTTP endpoint
//!
//! Usage:
//!   kwhmon run                      # Start daemon (PostgreSQL store)
//!   kwhmon run --endpoint 8080      # Start with HTTP status endpoint on port 8080
//!   kwhmon run --once --memory      # Single cycle, in-memory store
//!   kwhmon check                    # Test portal credentials
//!   kwhmon fetch --date 2024-07-01  # Print one day's hourly usage
//!
//! Environment:
//!   DATABASE_URL     - PostgreSQL connection string
//!   KWHMON_USERNAME  - Portal username (overrides kwhmon.toml)
//!   KWHMON_PASSWORD  - Portal password (overrides kwhmon.toml)
//!   RUST_LOG         - Log filter (default: info)

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use kwhmon_service::config::{self, ServiceConfig, DEFAULT_CONFIG_PATH};
use kwhmon_service::daemon::{Daemon, DaemonConfig};
use kwhmon_service::endpoint;
use kwhmon_service::model::StatisticMetadata;
use kwhmon_service::portal::PortalClient;
use kwhmon_service::store::{MemoryStore, PgStatisticsStore, StatisticsStore};
use std::error::Error;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kwhmon", version, about = "Hourly electricity usage collector")]
struct Cli {
    /// Path to the service configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the polling daemon
    Run {
        /// Serve /health and /status on this port
        #[arg(long)]
        endpoint: Option<u16>,

        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,

        /// Keep statistics in memory instead of PostgreSQL
        #[arg(long)]
        memory: bool,
    },
    /// Sign in to the portal and report whether the credentials work
    Check,
    /// Fetch and print hourly usage without storing it
    Fetch {
        /// First local date (YYYY-MM-DD)
        #[arg(long)]
        date: NaiveDate,

        /// Last local date, inclusive (defaults to --date)
        #[arg(long)]
        end: Option<NaiveDate>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    info!("⚡ Energy Usage Monitoring Service");

    let config = match config::load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("❌ Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Command::Run { endpoint, once, memory } => {
            if memory {
                warn!("Using in-memory store; statistics are lost on exit");
                serve(&config, MemoryStore::new(), endpoint, once)
            } else {
                match PgStatisticsStore::connect() {
                    Ok(store) => serve(&config, store, endpoint, once),
                    Err(e) => Err(e.into()),
                }
            }
        }
        Command::Check => check(&config),
        Command::Fetch { date, end } => fetch(&config, date, end.unwrap_or(date)),
    };

    if let Err(e) = result {
        error!("❌ {}", e);
        std::process::exit(1);
    }
}

fn serve<S: StatisticsStore>(
    config: &ServiceConfig,
    store: S,
    endpoint_port: Option<u16>,
    once: bool,
) -> Result<(), Box<dyn Error>> {
    let tz = config.tz()?;
    let portal = PortalClient::from_config(config, tz)?;
    let metadata = StatisticMetadata::for_account(&config.name, portal.account_number());

    let daemon_config = DaemonConfig {
        poll_interval_minutes: config.poll_interval_minutes,
        backfill_days: config.backfill_days,
        time_zone: tz,
    };

    info!("📊 Initializing daemon for {}...", metadata.statistic_id);
    let mut daemon = Daemon::new(daemon_config, metadata, portal, store);
    daemon.initialize()?;
    info!("✓ Daemon initialized");

    if once {
        let report = daemon.run_once()?;
        info!(
            "✓ {} of {} days were missing; backfilled {} ({} rows)",
            report.missing.len(),
            report.days_checked,
            report.fetched.len(),
            report.rows_written
        );
        return Ok(());
    }

    // Start HTTP endpoint if requested (in background thread)
    if let Some(port) = endpoint_port {
        info!("🚀 Starting HTTP endpoint server...");
        let status = daemon.status();
        std::thread::spawn(move || {
            if let Err(e) = endpoint::start_endpoint_server(port, status) {
                error!("❌ Endpoint server error: {}", e);
            }
        });
    }

    info!("🔄 Starting continuous polling loop (Ctrl+C to stop)");
    daemon.run();
    Ok(())
}

fn check(config: &ServiceConfig) -> Result<(), Box<dyn Error>> {
    let mut portal = PortalClient::from_config(config, config.tz()?)?;
    if portal.check_credentials() {
        info!("✓ Signed in to {} as {}", config.portal_base_url, config.username);
        Ok(())
    } else {
        Err("portal rejected the configured credentials".into())
    }
}

fn fetch(config: &ServiceConfig, start: NaiveDate, end: NaiveDate) -> Result<(), Box<dyn Error>> {
    if end < start {
        return Err(format!("--end {} is before --date {}", end, start).into());
    }

    let mut portal = PortalClient::from_config(config, config.tz()?)?;
    let points = portal.fetch_hourly_range(start, end)?;

    let mut total = 0.0;
    for point in &points {
        println!("{}  {:>8.3} kWh", point.time.format("%Y-%m-%d %H:%M %Z"), point.usage_kwh);
        total += point.usage_kwh;
    }
    println!("{} hours, {:.2} kWh total", points.len(), total);
    Ok(())
}
