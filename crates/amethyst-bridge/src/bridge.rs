//! Plugin-side driver link.
//!
//! All VR runtime and driver-session state lives behind one async lock, so
//! `initialize`, `heartbeat`, `shutdown` and every tracker call observe a
//! consistent view and never overlap.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use amethyst_rpc::protocol::{plugin_router, RestartHandler};
use amethyst_rpc::{DriverClient, RpcConfig, TrackerResult, TrackerState, TrackerUpdate};

use crate::error::{BridgeError, BridgeResult};
use crate::host::VrHost;
use crate::status::ServiceStatus;

/// Minimum spacing between reconnect attempts made from `heartbeat`.
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// Result of [`DriverBridge::test_connection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTest {
    pub status: ServiceStatus,
    pub message: String,
    pub ping: Option<Duration>,
}

struct LinkState {
    vr_ready: bool,
    status: ServiceStatus,
    client: Option<DriverClient>,
    last_attempt: Option<Instant>,
}

/// Forwards driver-initiated restart requests to the VR host.
struct HostRestart<H>(Arc<H>);

impl<H: VrHost> RestartHandler for HostRestart<H> {
    fn request_vr_restart(&self, reason: &str) -> bool {
        info!("driver requested a VR restart: {reason}");
        self.0.request_restart(reason)
    }
}

pub struct DriverBridge<H: VrHost> {
    host: Arc<H>,
    config: RpcConfig,
    state: Mutex<LinkState>,
}

impl<H: VrHost> DriverBridge<H> {
    pub fn new(host: Arc<H>, config: RpcConfig) -> Self {
        Self {
            host,
            config,
            state: Mutex::new(LinkState {
                vr_ready: false,
                status: ServiceStatus::NotConnected,
                client: None,
                last_attempt: None,
            }),
        }
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    pub async fn status(&self) -> ServiceStatus {
        self.state.lock().await.status
    }

    pub async fn is_initialized(&self) -> bool {
        self.state.lock().await.vr_ready
    }

    /// Starts the VR runtime and input actions, then connects to the driver.
    ///
    /// A driver problem takes precedence over an input-action failure in
    /// the returned status.
    pub async fn initialize(&self) -> ServiceStatus {
        let mut state = self.state.lock().await;
        state.status = ServiceStatus::Ok;

        if !self.host.start_vr() {
            warn!("VR runtime is not ready");
            state.vr_ready = false;
            state.status = ServiceStatus::VrNotReady;
            return ServiceStatus::VrNotReady;
        }
        state.vr_ready = true;

        let input = if self.host.start_input_actions() {
            ServiceStatus::Ok
        } else {
            warn!("VR input actions could not be registered");
            ServiceStatus::InputActionsFailed
        };

        let driver = self.refresh_locked(&mut state).await;
        info!("bridge initialized: driver {driver}, input {input}");
        if driver.is_ok() {
            input
        } else {
            driver
        }
    }

    /// Reconnects if needed and pings the driver, updating the status.
    pub async fn refresh(&self) -> ServiceStatus {
        let mut state = self.state.lock().await;
        self.refresh_locked(&mut state).await
    }

    /// Input polling plus a rate-limited reconnect while the driver is gone.
    pub async fn heartbeat(&self) {
        let mut state = self.state.lock().await;
        if !state.vr_ready {
            return;
        }

        let host = Arc::clone(&self.host);
        if catch_unwind(AssertUnwindSafe(move || host.poll_input())).is_err() {
            error!("VR input poll panicked");
        }

        if state.status.is_ok() {
            if state.client.as_ref().is_some_and(DriverClient::is_closed) {
                warn!("driver session closed, marking unreachable");
                state.client = None;
                state.status = ServiceStatus::Unreachable;
            }
            return;
        }

        let due = state
            .last_attempt
            .map_or(true, |at| at.elapsed() >= RECONNECT_INTERVAL);
        if due {
            debug!("heartbeat reconnect attempt (status {})", state.status);
            self.refresh_locked(&mut state).await;
        }
    }

    /// Enables or disables trackers and collects per-role results.
    ///
    /// Empty when the driver link is not healthy. Failed calls report every
    /// requested role as unsuccessful.
    pub async fn set_tracker_states(&self, states: Vec<TrackerState>) -> Vec<TrackerResult> {
        let mut state = self.state.lock().await;
        let client = match Self::healthy_client(&state) {
            Ok(client) => client,
            Err(err) => {
                debug!("set_tracker_states skipped: {err}");
                return Vec::new();
            }
        };

        let roles: Vec<_> = states.iter().map(|s| s.role).collect();
        match client.set_tracker_states(states).await {
            Ok(results) => results,
            Err(err) => {
                Self::record_failure(&mut state, "SetTrackerStateList", err.into()).await;
                roles
                    .into_iter()
                    .map(|role| TrackerResult::new(role, false))
                    .collect()
            }
        }
    }

    /// Fire-and-forget form of [`set_tracker_states`](Self::set_tracker_states).
    pub async fn push_tracker_states(&self, states: Vec<TrackerState>) -> bool {
        let mut state = self.state.lock().await;
        let result = match Self::healthy_client(&state) {
            Ok(client) => client
                .push_tracker_states(states)
                .await
                .map_err(BridgeError::from),
            Err(err) => Err(err),
        };
        Self::settle_push(&mut state, "SetTrackerStateList", result).await
    }

    /// Per-frame pose push. Returns whether the batch was handed to the
    /// channel; the driver never answers.
    pub async fn update_tracker_poses(&self, updates: Vec<TrackerUpdate>) -> bool {
        let mut state = self.state.lock().await;
        let result = match Self::healthy_client(&state) {
            Ok(client) => client
                .push_trackers(updates)
                .await
                .map_err(BridgeError::from),
            Err(err) => Err(err),
        };
        Self::settle_push(&mut state, "UpdateTrackerList", result).await
    }

    /// Pose update that waits for the driver's per-role results.
    pub async fn update_tracker_poses_acked(
        &self,
        updates: Vec<TrackerUpdate>,
    ) -> Vec<TrackerResult> {
        let mut state = self.state.lock().await;
        let client = match Self::healthy_client(&state) {
            Ok(client) => client,
            Err(_) => return Vec::new(),
        };

        let roles: Vec<_> = updates.iter().map(|u| u.role).collect();
        match client.update_trackers(updates).await {
            Ok(results) => results,
            Err(err) => {
                Self::record_failure(&mut state, "UpdateTrackerList", err.into()).await;
                roles
                    .into_iter()
                    .map(|role| TrackerResult::new(role, false))
                    .collect()
            }
        }
    }

    /// Refreshes the link and times a ping.
    pub async fn test_connection(&self) -> ConnectionTest {
        let mut state = self.state.lock().await;
        let status = self.refresh_locked(&mut state).await;
        let client = match (status.is_ok(), state.client.clone()) {
            (true, Some(client)) => client,
            _ => {
                return ConnectionTest {
                    status,
                    message: "SERVICE_INVALID".to_string(),
                    ping: None,
                }
            }
        };

        match client.ping().await {
            Ok(report) => ConnectionTest {
                status: ServiceStatus::Ok,
                message: "OK".to_string(),
                ping: Some(report.rtt),
            },
            Err(err) => {
                let message = format!("EXCEPTION {err}");
                Self::record_failure(&mut state, "PingDriverService", err.into()).await;
                ConnectionTest {
                    status: state.status,
                    message,
                    ping: None,
                }
            }
        }
    }

    /// Asks the driver to have its host restart the VR session.
    ///
    /// `None` when there is no healthy driver link to ask.
    pub async fn request_vr_restart(&self, reason: &str) -> Option<bool> {
        let mut state = self.state.lock().await;
        let client = Self::healthy_client(&state).ok()?;
        match client.request_vr_restart(reason).await {
            Ok(accepted) => Some(accepted),
            Err(err) => {
                Self::record_failure(&mut state, "RequestVrRestart", err.into()).await;
                Some(false)
            }
        }
    }

    /// Closes the driver link and stops the VR runtime.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if let Some(client) = state.client.take() {
            client.close().await;
        }
        if state.vr_ready {
            self.host.shutdown_vr();
        }
        state.vr_ready = false;
        state.status = ServiceStatus::VrNotReady;
        info!("bridge shut down");
    }

    async fn refresh_locked(&self, state: &mut LinkState) -> ServiceStatus {
        if !state.vr_ready {
            state.status = ServiceStatus::VrNotReady;
            return state.status;
        }
        state.last_attempt = Some(Instant::now());

        if state.client.as_ref().is_some_and(DriverClient::is_closed) {
            state.client = None;
        }
        let client = match state.client.clone() {
            Some(client) => client,
            None => {
                let router = plugin_router(Arc::new(HostRestart(Arc::clone(&self.host))));
                match DriverClient::connect(&self.config, router).await {
                    Ok(client) => {
                        info!("connected to driver at {}", self.config.endpoint);
                        state.client = Some(client.clone());
                        client
                    }
                    Err(err) => {
                        state.status = ServiceStatus::from_error(&err);
                        warn!("driver connect to {} failed: {err}", self.config.endpoint);
                        return state.status;
                    }
                }
            }
        };

        match client.ping().await {
            Ok(report) => {
                debug!("driver ping {:?}", report.rtt);
                state.status = ServiceStatus::Ok;
            }
            Err(err) => {
                Self::record_failure(state, "PingDriverService", err.into()).await;
            }
        }
        state.status
    }

    fn healthy_client(state: &LinkState) -> BridgeResult<DriverClient> {
        match (&state.client, state.status) {
            (Some(client), ServiceStatus::Ok) if state.vr_ready => Ok(client.clone()),
            (_, status) => Err(BridgeError::Unavailable(status)),
        }
    }

    async fn settle_push(
        state: &mut LinkState,
        method: &str,
        result: BridgeResult<()>,
    ) -> bool {
        match result {
            Ok(()) => true,
            Err(BridgeError::Unavailable(_)) => false,
            Err(err) => {
                Self::record_failure(state, method, err).await;
                false
            }
        }
    }

    /// Reclassifies the status after a failed call. An unreachable driver's
    /// session is closed so its stream is released before the next attempt.
    async fn record_failure(state: &mut LinkState, method: &str, err: BridgeError) {
        let status = match &err {
            BridgeError::Rpc(rpc) => ServiceStatus::from_error(rpc),
            BridgeError::Unavailable(status) => *status,
        };
        warn!("{method} failed: {err}");
        if status == ServiceStatus::Unreachable {
            if let Some(client) = state.client.take() {
                client.close().await;
            }
        }
        state.status = status;
    }
}
