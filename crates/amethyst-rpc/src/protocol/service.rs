use std::sync::Arc;

use tracing::warn;

use super::tracker::{dedup_by_role, TrackerResult, TrackerState, TrackerUpdate};
use super::Method;
use crate::session::Router;

/// Driver-side implementation of the tracker methods.
///
/// Handlers are synchronous; they run on the session's handler tasks.
pub trait DriverService: Send + Sync + 'static {
    fn set_tracker_states(&self, states: Vec<TrackerState>) -> Vec<TrackerResult>;

    fn update_trackers(&self, updates: Vec<TrackerUpdate>) -> Vec<TrackerResult>;

    /// Asks the VR runtime to restart. Returns whether the request was accepted.
    fn request_vr_restart(&self, reason: &str) -> bool;

    /// Driver wall clock in microseconds since the Unix epoch.
    fn ping(&self) -> i64 {
        chrono::Utc::now().timestamp_micros()
    }
}

/// Plugin-side handler for restart requests coming from the driver.
pub trait RestartHandler: Send + Sync + 'static {
    fn request_vr_restart(&self, reason: &str) -> bool;
}

/// Routes every plugin→driver method to `service`.
pub fn driver_router<S: DriverService>(service: Arc<S>) -> Router<Method> {
    let states = Arc::clone(&service);
    let updates = Arc::clone(&service);
    let restart = Arc::clone(&service);
    let ping = service;

    Router::new()
        .route(Method::SetTrackerStateList, move |batch: Vec<TrackerState>| {
            let service = Arc::clone(&states);
            async move { Ok(service.set_tracker_states(dedup_by_role(batch))) }
        })
        .route(Method::UpdateTrackerList, move |batch: Vec<TrackerUpdate>| {
            let service = Arc::clone(&updates);
            async move { Ok(service.update_trackers(dedup_by_role(batch))) }
        })
        .route(Method::RequestVrRestart, move |reason: String| {
            let service = Arc::clone(&restart);
            async move { Ok(checked_restart(&reason, |r| service.request_vr_restart(r))) }
        })
        .route(Method::PingDriverService, move |_: ()| {
            let service = Arc::clone(&ping);
            async move { Ok(service.ping()) }
        })
}

/// Routes driver→plugin restart requests to `handler`.
pub fn plugin_router<H: RestartHandler>(handler: Arc<H>) -> Router<Method> {
    Router::new().route(Method::RequestVrRestart, move |reason: String| {
        let handler = Arc::clone(&handler);
        async move { Ok(checked_restart(&reason, |r| handler.request_vr_restart(r))) }
    })
}

// An empty reason is refused before reaching the runtime.
fn checked_restart(reason: &str, forward: impl FnOnce(&str) -> bool) -> bool {
    if reason.trim().is_empty() {
        warn!("refusing VR restart request without a reason");
        return false;
    }
    forward(reason)
}
