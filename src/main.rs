//! logship binary
//!
//! Ships queued events to the configured collector until interrupted.

use clap::Parser;
use logship::config::ShipperConfig;
use logship::queue::EventShipper;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "logship")]
#[command(about = "Crash-resilient event shipper")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Base directory of the staging root
    #[arg(short, long)]
    base_dir: Option<PathBuf>,

    /// Collector endpoint URL
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Inbox polling interval in milliseconds
    #[arg(long, default_value = "1000")]
    poll_ms: u64,

    /// Queue one error event with this message before shipping
    #[arg(long)]
    emit: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize tracing
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(if args.verbose {
            "logship=debug,info"
        } else {
            "logship=info,warn,error"
        })
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting logship v{}", env!("CARGO_PKG_VERSION"));

    let mut config = ShipperConfig::load(args.config.as_deref())?;

    // Override config with CLI arguments
    if let Some(base_dir) = args.base_dir {
        config.storage.base_directory = base_dir;
    }
    if let Some(endpoint) = args.endpoint {
        config.endpoint.url = endpoint;
    }

    info!("Staging root: {}", config.storage.root().display());
    info!("Endpoint: {}", config.endpoint.url);
    info!("Retry interval: {}s", config.retry.interval_seconds);

    let shipper = match EventShipper::builder(config)
        .poll_inbox(Duration::from_millis(args.poll_ms.max(1)))
        .start()
        .await
    {
        Ok(shipper) => shipper,
        Err(e) => {
            error!("Failed to start: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(message) = args.emit {
        match shipper.logger().error(message)? {
            Some(path) => info!("Queued {}", path.display()),
            None => info!("Event filtered by the configured minimum level"),
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down gracefully...");
    shipper.shutdown().await;

    info!("logship stopped");
    Ok(())
}
