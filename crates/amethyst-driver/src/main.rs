#![forbid(unsafe_code)]

//! Standalone Amethyst driver process.
//!
//! Serves the tracker methods on the configured endpoint and drives a
//! headless runtime that logs every device and pose it receives.

use std::path::PathBuf;
use std::sync::Arc;

use amethyst_driver::{Driver, DriverConfig, LoggingHost};
use amethyst_rpc::Endpoint;
use anyhow::Result;
use clap::Parser;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "amethyst-driver")]
#[command(about = "Amethyst tracker driver - receives tracker updates from the plugin")]
struct Args {
    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Endpoint to listen on (tcp://host:port, unix://path, pipe://name)
    #[arg(long, env = "AMETHYST_ENDPOINT")]
    endpoint: Option<Endpoint>,

    /// Tracker frame rate in Hz
    #[arg(long)]
    frame_hz: Option<u32>,

    /// Largest accepted frame in bytes
    #[arg(long)]
    max_frame_bytes: Option<usize>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    amethyst_common::init_logging(&args.log_level);

    let mut config = DriverConfig::load(args.config.as_deref())?;
    if let Some(endpoint) = args.endpoint {
        config.rpc.endpoint = endpoint;
    }
    if let Some(hz) = args.frame_hz {
        config.frame_hz = hz;
    }
    if let Some(max) = args.max_frame_bytes {
        config.rpc.max_frame_len = max;
    }

    info!("Starting amethyst-driver v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "{} tracker(s), {} Hz frame loop",
        config.trackers.len(),
        config.frame_hz
    );

    let driver = Driver::bind(config, Arc::new(LoggingHost::new())).await?;
    info!("driver listening on {}", driver.local_endpoint());

    driver
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;
    Ok(())
}
