//! Typed callers for the tracker methods.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::RpcConfig;
use crate::error::RpcResult;
use crate::protocol::{dedup_by_role, Method, TrackerResult, TrackerState, TrackerUpdate};
use crate::session::{Router, RpcSession};

/// Outcome of one `PingDriverService` round trip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PingReport {
    /// Driver clock, microseconds since the Unix epoch.
    pub driver_time_us: i64,
    /// Locally measured round trip.
    pub rtt: Duration,
}

impl PingReport {
    pub fn driver_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_micros(self.driver_time_us)
    }
}

/// Plugin-side connection to the driver.
#[derive(Clone)]
pub struct DriverClient {
    session: RpcSession<Method>,
    call_timeout: Duration,
}

impl DriverClient {
    /// Connects to `config.endpoint` within `config.connect_timeout_ms`.
    ///
    /// `router` serves calls the driver makes back into the plugin.
    pub async fn connect(config: &RpcConfig, router: Router<Method>) -> RpcResult<Self> {
        let stream = config.endpoint.connect(config.connect_timeout()).await?;
        let session = RpcSession::new(
            stream,
            router,
            config.channel_options(),
            format!("driver@{}", config.endpoint),
        );
        debug!("driver session open on {}", config.endpoint);
        Ok(Self::from_session(session, config.call_timeout()))
    }

    pub fn from_session(session: RpcSession<Method>, call_timeout: Duration) -> Self {
        Self {
            session,
            call_timeout,
        }
    }

    pub fn session(&self) -> &RpcSession<Method> {
        &self.session
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_closed()
    }

    /// Enables or disables trackers and waits for per-role results.
    pub async fn set_tracker_states(
        &self,
        states: Vec<TrackerState>,
    ) -> RpcResult<Vec<TrackerResult>> {
        self.session
            .call_timeout(
                Method::SetTrackerStateList,
                &dedup_by_role(states),
                self.call_timeout,
            )
            .await
    }

    /// Fire-and-forget form of [`set_tracker_states`](Self::set_tracker_states).
    ///
    /// Fails with `Timeout` when the driver stops draining the channel.
    pub async fn push_tracker_states(&self, states: Vec<TrackerState>) -> RpcResult<()> {
        self.session
            .notify_timeout(
                Method::SetTrackerStateList,
                &dedup_by_role(states),
                self.call_timeout,
            )
            .await
    }

    pub async fn update_trackers(
        &self,
        updates: Vec<TrackerUpdate>,
    ) -> RpcResult<Vec<TrackerResult>> {
        self.session
            .call_timeout(
                Method::UpdateTrackerList,
                &dedup_by_role(updates),
                self.call_timeout,
            )
            .await
    }

    /// Per-frame pose push; nothing comes back. Bounded like
    /// [`push_tracker_states`](Self::push_tracker_states).
    pub async fn push_trackers(&self, updates: Vec<TrackerUpdate>) -> RpcResult<()> {
        self.session
            .notify_timeout(
                Method::UpdateTrackerList,
                &dedup_by_role(updates),
                self.call_timeout,
            )
            .await
    }

    pub async fn request_vr_restart(&self, reason: &str) -> RpcResult<bool> {
        self.session
            .call_timeout(Method::RequestVrRestart, reason, self.call_timeout)
            .await
    }

    /// Liveness check. Any error here means the driver is unreachable.
    pub async fn ping(&self) -> RpcResult<PingReport> {
        let started = Instant::now();
        let driver_time_us: i64 = self
            .session
            .call_timeout(Method::PingDriverService, &(), self.call_timeout)
            .await?;
        Ok(PingReport {
            driver_time_us,
            rtt: started.elapsed(),
        })
    }

    pub async fn close(&self) {
        self.session.close().await;
    }
}

/// Driver-side handle for calling back into a connected plugin.
#[derive(Clone)]
pub struct PluginClient {
    session: RpcSession<Method>,
    call_timeout: Duration,
}

impl PluginClient {
    pub fn new(session: RpcSession<Method>, call_timeout: Duration) -> Self {
        Self {
            session,
            call_timeout,
        }
    }

    /// Asks the plugin's host to restart the VR session.
    pub async fn request_vr_restart(&self, reason: &str) -> RpcResult<bool> {
        self.session
            .call_timeout(Method::RequestVrRestart, reason, self.call_timeout)
            .await
    }
}
