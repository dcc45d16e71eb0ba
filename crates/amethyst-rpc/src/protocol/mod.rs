//! The tracker update method surface.
//!
//! | method                | direction              | args                 | reply                |
//! |-----------------------|------------------------|----------------------|----------------------|
//! | `SetTrackerStateList` | plugin → driver        | `Vec<TrackerState>`  | `Vec<TrackerResult>` |
//! | `UpdateTrackerList`   | plugin → driver        | `Vec<TrackerUpdate>` | `Vec<TrackerResult>` |
//! | `RequestVrRestart`    | either way             | `String` reason      | `bool` accepted      |
//! | `PingDriverService`   | plugin → driver        | `()`                 | `i64` driver µs      |
//!
//! The batch methods may also be sent as notifications, in which case no
//! reply frame is produced.

mod service;
mod tracker;

pub use service::{driver_router, plugin_router, DriverService, RestartHandler};
pub use tracker::{
    dedup_by_role, result_for, RoleKeyed, TrackerResult, TrackerRole, TrackerState,
    TrackerUpdate, TrackingState,
};

use crate::session::MethodKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    SetTrackerStateList,
    UpdateTrackerList,
    RequestVrRestart,
    PingDriverService,
}

impl Method {
    pub const ALL: [Method; 4] = [
        Method::SetTrackerStateList,
        Method::UpdateTrackerList,
        Method::RequestVrRestart,
        Method::PingDriverService,
    ];
}

impl MethodKind for Method {
    fn name(self) -> &'static str {
        match self {
            Method::SetTrackerStateList => "SetTrackerStateList",
            Method::UpdateTrackerList => "UpdateTrackerList",
            Method::RequestVrRestart => "RequestVrRestart",
            Method::PingDriverService => "PingDriverService",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.name() == name)
    }
}
