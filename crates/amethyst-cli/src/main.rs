//! Amethyst CLI tools: driver diagnostics and manual tracker control.

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use amethyst_rpc::protocol::{plugin_router, result_for, RestartHandler};
use amethyst_rpc::{
    DriverClient, Endpoint, Quaternion, RpcConfig, TrackerRole, TrackerState, TrackerUpdate,
    TrackingState, Vector3,
};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, warn};

#[derive(Parser, Debug)]
#[command(name = "ame")]
#[command(about = "Amethyst CLI tools")]
struct Args {
    /// JSON config file with an RPC section
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Driver endpoint (tcp://host:port, unix://path, pipe://name)
    #[arg(long, global = true, env = "AMETHYST_ENDPOINT")]
    endpoint: Option<Endpoint>,

    /// Log level
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ping the driver and print round-trip times
    Ping {
        #[arg(short, long, default_value_t = 4)]
        count: u32,

        /// Delay between pings in milliseconds
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
    },

    /// Enable or disable a tracker
    SetState {
        role: TrackerRole,
        #[arg(value_parser = parse_switch, action = clap::ArgAction::Set)]
        state: bool,
    },

    /// Stream a fixed pose for one tracker
    #[command(allow_negative_numbers = true)]
    Push {
        role: TrackerRole,
        x: f32,
        y: f32,
        z: f32,

        #[arg(long, default_value_t = 60)]
        hz: u32,

        #[arg(long, default_value_t = 1.0)]
        seconds: f32,
    },

    /// Ask the driver to restart the VR session
    Restart { reason: String },

    /// Print the effective RPC configuration
    Config {
        /// Also write it to this file, ready for `--config`
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Show version information
    Version,
}

fn parse_switch(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" | "enable" => Ok(true),
        "off" | "false" | "0" | "disable" => Ok(false),
        other => Err(format!("expected on/off, got '{other}'")),
    }
}

/// Driver-initiated restarts are refused; the CLI has no VR session.
struct NoVrSession;

impl RestartHandler for NoVrSession {
    fn request_vr_restart(&self, reason: &str) -> bool {
        warn!("ignoring driver restart request: {reason}");
        false
    }
}

fn load_config(args: &Args) -> Result<RpcConfig> {
    let mut config: RpcConfig =
        amethyst_common::config::load_json_or_default(args.config.as_deref())
            .context("loading config")?;
    config.apply_env();
    if let Some(endpoint) = &args.endpoint {
        config.endpoint = endpoint.clone();
    }
    Ok(config)
}

async fn connect(config: &RpcConfig) -> Result<DriverClient> {
    DriverClient::connect(config, plugin_router(Arc::new(NoVrSession)))
        .await
        .with_context(|| format!("connecting to driver at {}", config.endpoint))
}

async fn ping(config: &RpcConfig, count: u32, interval: Duration) -> Result<()> {
    let client = connect(config).await?;
    println!("Pinging driver at {}...", config.endpoint);

    let mut rtts = Vec::new();
    for seq in 0..count {
        if seq > 0 {
            tokio::time::sleep(interval).await;
        }
        match client.ping().await {
            Ok(report) => {
                let clock = report
                    .driver_time()
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| report.driver_time_us.to_string());
                println!("seq={seq} rtt={:?} driver_clock={clock}", report.rtt);
                rtts.push(report.rtt);
            }
            Err(e) => println!("seq={seq} failed: {e}"),
        }
    }
    client.close().await;

    if rtts.is_empty() {
        bail!("driver did not answer any ping");
    }
    let total: Duration = rtts.iter().sum();
    println!(
        "{}/{} answered, avg rtt {:?}",
        rtts.len(),
        count,
        total / rtts.len() as u32
    );
    Ok(())
}

async fn set_state(config: &RpcConfig, role: TrackerRole, state: bool) -> Result<()> {
    let client = connect(config).await?;
    let results = client
        .set_tracker_states(vec![TrackerState::new(role, state)])
        .await?;
    client.close().await;

    match result_for(&results, role) {
        Some(true) => println!("{role}: {}", if state { "enabled" } else { "disabled" }),
        Some(false) => bail!("driver rejected state change for {role}"),
        None => bail!("driver returned no result for {role}"),
    }
    Ok(())
}

async fn push(
    config: &RpcConfig,
    role: TrackerRole,
    position: Vector3,
    hz: u32,
    seconds: f32,
) -> Result<()> {
    if hz == 0 {
        bail!("--hz must be positive");
    }
    let client = connect(config).await?;

    let enabled = client
        .set_tracker_states(vec![TrackerState::new(role, true)])
        .await?;
    if result_for(&enabled, role) != Some(true) {
        bail!("driver could not enable {role}");
    }

    let frames = (seconds.max(0.0) * hz as f32).round() as u64;
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / f64::from(hz)));
    for _ in 0..frames {
        ticker.tick().await;
        let update = TrackerUpdate::new(role)
            .with_pose(position, Quaternion::IDENTITY)
            .with_tracking(TrackingState::Tracked);
        client.push_trackers(vec![update]).await?;
    }

    // Round trip so every pushed frame is known to have been read.
    client.ping().await?;
    client.close().await;
    println!("pushed {frames} frame(s) for {role}");
    Ok(())
}

async fn restart(config: &RpcConfig, reason: &str) -> Result<()> {
    let client = connect(config).await?;
    let accepted = client.request_vr_restart(reason).await?;
    client.close().await;
    if !accepted {
        bail!("driver refused the restart request");
    }
    println!("restart requested");
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    amethyst_common::init_logging(&args.log_level);

    let config = load_config(&args)?;
    debug!("using endpoint {}", config.endpoint);

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    match args.command {
        Command::Ping { count, interval_ms } => {
            rt.block_on(ping(&config, count, Duration::from_millis(interval_ms)))?
        }
        Command::SetState { role, state } => rt.block_on(set_state(&config, role, state))?,
        Command::Push {
            role,
            x,
            y,
            z,
            hz,
            seconds,
        } => rt.block_on(push(&config, role, Vector3::new(x, y, z), hz, seconds))?,
        Command::Restart { reason } => rt.block_on(restart(&config, &reason))?,
        Command::Config { save } => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            if let Some(path) = save {
                amethyst_common::config::save_json(&path, &config)?;
                println!("saved to {}", path.display());
            }
        }
        Command::Version => {
            println!("ame {}", env!("CARGO_PKG_VERSION"));
            println!("default endpoint: {}", Endpoint::platform_default());
        }
    }
    Ok(())
}
