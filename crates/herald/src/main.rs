//! Herald: scheduled social post delivery.
//!
//! Main binary with subcommands:
//! - `daemon`: API server, publication worker and overdue sweeper

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod daemon;

/// Parse boolean from environment variable, accepting common truthy values.
/// Accepts "1", "true", "yes", "on" (case-insensitive) as true.
/// Accepts "0", "false", "no", "off", "" (case-insensitive) as false.
fn parse_bool_env(s: &str) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(format!(
            "invalid boolean value '{}', expected 1/true/yes/on or 0/false/no/off",
            s
        )),
    }
}

#[derive(Parser)]
#[command(name = "herald")]
#[command(about = "Scheduled social post delivery", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon (API server, publication worker, overdue sweeper)
    Daemon {
        /// Post store snapshot file
        #[arg(long, env = "HERALD_STORE_PATH", default_value = "herald-posts.json")]
        store_path: PathBuf,

        /// Base URL of the platform API posts are published to
        #[arg(long, env = "HERALD_PUBLISHER_URL")]
        publisher_url: String,

        /// Address the API server listens on
        #[arg(long, env = "HERALD_LISTEN", default_value = daemon::DEFAULT_LISTEN_ADDR)]
        listen: SocketAddr,

        /// Jobs published in parallel (default 4)
        #[arg(long, env = "HERALD_WORKER_CONCURRENCY")]
        worker_concurrency: Option<usize>,

        /// Seconds between overdue sweeps (default 60)
        #[arg(long, env = "HERALD_SWEEP_INTERVAL")]
        sweep_interval: Option<u64>,

        /// Publish times closer than this many seconds get a warning (default 300)
        #[arg(long, env = "HERALD_MIN_LEAD_TIME")]
        min_lead_time: Option<u64>,

        /// Attempts per job before it is moved to failed (default 3)
        #[arg(long, env = "HERALD_MAX_ATTEMPTS")]
        max_attempts: Option<u32>,

        /// Seconds before the first job retry, doubling per attempt (default 30)
        #[arg(long, env = "HERALD_BACKOFF_BASE")]
        backoff_base: Option<u64>,

        /// Accept publish times in the past. For debugging only.
        /// Accepts "1", "true", "yes", or "on".
        #[arg(long, env = "HERALD_ALLOW_PAST_SCHEDULES", value_parser = parse_bool_env, default_value = "false")]
        allow_past_schedules: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "herald=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon {
            store_path,
            publisher_url,
            listen,
            worker_concurrency,
            sweep_interval,
            min_lead_time,
            max_attempts,
            backoff_base,
            allow_past_schedules,
        } => {
            daemon::run(daemon::DaemonConfig {
                store_path,
                publisher_url,
                listen_addr: listen,
                worker_concurrency,
                sweep_interval,
                min_lead_time,
                max_attempts,
                backoff_base,
                allow_past_schedules,
            })
            .await
        }
    }
}
