//! Driver side of the Amethyst tracker bridge.
//!
//! Owns one [`BodyTracker`](tracker::BodyTracker) per role, serves the tracker
//! methods to connected plugins, and pushes poses to the VR runtime on a fixed
//! frame tick.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod host;
pub mod service;
pub mod tracker;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use amethyst_rpc::protocol::driver_router;
use amethyst_rpc::{Endpoint, Method, PluginClient, RpcServer, ServerHandle};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub use config::DriverConfig;
pub use error::{DriverError, DriverResult};
pub use host::{DeviceIndex, DevicePose, DriverHost, LoggingHost};
pub use service::TrackerDriver;

/// A bound driver, ready to serve.
pub struct Driver<H: DriverHost> {
    service: Arc<TrackerDriver<H>>,
    server: RpcServer<Method>,
    config: DriverConfig,
}

impl<H: DriverHost> Driver<H> {
    /// Registers the configured trackers and binds the endpoint.
    ///
    /// A bind failure is returned, never retried.
    pub async fn bind(config: DriverConfig, host: Arc<H>) -> DriverResult<Self> {
        let service = Arc::new(TrackerDriver::new(host, &config.trackers));
        let server = RpcServer::bind(
            &config.rpc.endpoint,
            driver_router(Arc::clone(&service)),
            config.rpc.channel_options(),
        )
        .await?;
        Ok(Self {
            service,
            server,
            config,
        })
    }

    pub fn local_endpoint(&self) -> Endpoint {
        self.server.local_endpoint()
    }

    pub fn service(&self) -> Arc<TrackerDriver<H>> {
        Arc::clone(&self.service)
    }

    pub fn plugins(&self) -> PluginLinks {
        PluginLinks {
            handle: self.server.handle(),
            call_timeout: self.config.rpc.call_timeout(),
        }
    }

    /// Serves connections and runs the frame loop until `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> DriverResult<()>
    where
        F: Future<Output = ()>,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let frames = tokio::spawn(frame_loop(
            Arc::clone(&self.service),
            self.config.frame_hz,
            stop_rx,
        ));

        self.server.serve_with_shutdown(shutdown).await;

        let _ = stop_tx.send(true);
        if let Err(e) = frames.await {
            warn!("frame loop ended abnormally: {}", e);
        }
        info!("driver stopped");
        Ok(())
    }
}

/// Runs [`TrackerDriver::run_frame`] at `hz` until `stop` flips to true.
pub async fn frame_loop<H: DriverHost>(
    service: Arc<TrackerDriver<H>>,
    hz: u32,
    mut stop: watch::Receiver<bool>,
) {
    let period = Duration::from_secs_f64(1.0 / f64::from(hz.max(1)));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    debug!("frame loop running every {:?}", period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                service.run_frame();
            }
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }
}

/// Calls from the driver back into connected plugins.
#[derive(Clone)]
pub struct PluginLinks {
    handle: ServerHandle<Method>,
    call_timeout: Duration,
}

impl PluginLinks {
    pub async fn connected(&self) -> usize {
        self.handle.connection_count().await
    }

    /// Asks every connected plugin to restart the VR session.
    ///
    /// Returns how many accepted. Unreachable plugins are skipped.
    pub async fn request_vr_restart(&self, reason: &str) -> usize {
        let mut accepted = 0;
        for (id, session) in self.handle.sessions().await {
            let plugin = PluginClient::new(session, self.call_timeout);
            match plugin.request_vr_restart(reason).await {
                Ok(true) => accepted += 1,
                Ok(false) => debug!("connection #{} declined the restart", id),
                Err(e) => warn!("connection #{} restart request failed: {}", id, e),
            }
        }
        accepted
    }
}
