//! Tracker data exchanged between the plugin and the driver.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::math::{Quaternion, Vector3};

/// Body-part binding of a tracker. Discriminants are stable on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TrackerRole {
    Handed = 0,
    LeftFoot = 1,
    RightFoot = 2,
    LeftShoulder = 3,
    RightShoulder = 4,
    LeftElbow = 5,
    RightElbow = 6,
    LeftKnee = 7,
    RightKnee = 8,
    Waist = 9,
    Chest = 10,
    Camera = 11,
    Keyboard = 12,
}

impl TrackerRole {
    pub const ALL: [TrackerRole; 13] = [
        TrackerRole::Handed,
        TrackerRole::LeftFoot,
        TrackerRole::RightFoot,
        TrackerRole::LeftShoulder,
        TrackerRole::RightShoulder,
        TrackerRole::LeftElbow,
        TrackerRole::RightElbow,
        TrackerRole::LeftKnee,
        TrackerRole::RightKnee,
        TrackerRole::Waist,
        TrackerRole::Chest,
        TrackerRole::Camera,
        TrackerRole::Keyboard,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            TrackerRole::Handed => "Handed",
            TrackerRole::LeftFoot => "LeftFoot",
            TrackerRole::RightFoot => "RightFoot",
            TrackerRole::LeftShoulder => "LeftShoulder",
            TrackerRole::RightShoulder => "RightShoulder",
            TrackerRole::LeftElbow => "LeftElbow",
            TrackerRole::RightElbow => "RightElbow",
            TrackerRole::LeftKnee => "LeftKnee",
            TrackerRole::RightKnee => "RightKnee",
            TrackerRole::Waist => "Waist",
            TrackerRole::Chest => "Chest",
            TrackerRole::Camera => "Camera",
            TrackerRole::Keyboard => "Keyboard",
        }
    }

    /// Serial the driver registers the tracker under by default.
    pub fn default_serial(self) -> &'static str {
        match self {
            TrackerRole::Handed => "AME-HANDED",
            TrackerRole::LeftFoot => "AME-LFOOT",
            TrackerRole::RightFoot => "AME-RFOOT",
            TrackerRole::LeftShoulder => "AME-LSHOULDER",
            TrackerRole::RightShoulder => "AME-RSHOULDER",
            TrackerRole::LeftElbow => "AME-LELBOW",
            TrackerRole::RightElbow => "AME-RELBOW",
            TrackerRole::LeftKnee => "AME-LKNEE",
            TrackerRole::RightKnee => "AME-RKNEE",
            TrackerRole::Waist => "AME-WAIST",
            TrackerRole::Chest => "AME-CHEST",
            TrackerRole::Camera => "AME-CAMERA",
            TrackerRole::Keyboard => "AME-KEYBOARD",
        }
    }

    /// Role hint handed to the VR runtime, e.g. `TrackerRole_Waist`.
    pub fn role_hint(self) -> String {
        format!("TrackerRole_{}", self.name())
    }
}

impl fmt::Display for TrackerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TrackerRole {
    type Err = String;

    /// Accepts the role name in any case, with or without separators.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        if let Ok(index) = wanted.parse::<usize>() {
            return Self::from_index(index).ok_or_else(|| format!("no tracker role #{index}"));
        }
        Self::ALL
            .iter()
            .copied()
            .find(|role| role.name().to_ascii_lowercase() == wanted)
            .ok_or_else(|| format!("unknown tracker role {s:?}"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackingState {
    #[default]
    NotTracked,
    Inferred,
    Tracked,
}

impl TrackingState {
    /// Coarse form used by runtimes that only take a validity flag.
    pub fn is_valid(self) -> bool {
        !matches!(self, TrackingState::NotTracked)
    }
}

/// One tracker's state for a single update call.
///
/// `None` in an optional field means "not supplied this call".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerUpdate {
    pub role: TrackerRole,
    pub serial: String,
    pub connection_state: bool,
    pub tracking_state: TrackingState,
    pub position: Option<Vector3>,
    pub orientation: Option<Quaternion>,
    pub velocity: Option<Vector3>,
    pub acceleration: Option<Vector3>,
    pub angular_velocity: Option<Vector3>,
    pub angular_acceleration: Option<Vector3>,
}

impl TrackerUpdate {
    /// A connected, tracked update with no pose fields set.
    pub fn new(role: TrackerRole) -> Self {
        Self {
            role,
            serial: role.default_serial().to_string(),
            connection_state: true,
            tracking_state: TrackingState::Tracked,
            position: None,
            orientation: None,
            velocity: None,
            acceleration: None,
            angular_velocity: None,
            angular_acceleration: None,
        }
    }

    pub fn with_pose(mut self, position: Vector3, orientation: Quaternion) -> Self {
        self.position = Some(position);
        self.orientation = Some(orientation);
        self
    }

    pub fn with_tracking(mut self, state: TrackingState) -> Self {
        self.tracking_state = state;
        self
    }

    pub fn with_velocity(mut self, linear: Vector3, angular: Vector3) -> Self {
        self.velocity = Some(linear);
        self.angular_velocity = Some(angular);
        self
    }

    pub fn with_acceleration(mut self, linear: Vector3, angular: Vector3) -> Self {
        self.acceleration = Some(linear);
        self.angular_acceleration = Some(angular);
        self
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = serial.into();
        self
    }

    pub fn disconnected(mut self) -> Self {
        self.connection_state = false;
        self
    }
}

/// The role and connection flag subset of a [`TrackerUpdate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerState {
    pub role: TrackerRole,
    pub connection_state: bool,
}

impl TrackerState {
    pub fn new(role: TrackerRole, connection_state: bool) -> Self {
        Self {
            role,
            connection_state,
        }
    }
}

impl From<&TrackerUpdate> for TrackerState {
    fn from(update: &TrackerUpdate) -> Self {
        Self::new(update.role, update.connection_state)
    }
}

/// Per-tracker outcome of a batch call. `success = false` is data, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerResult {
    pub role: TrackerRole,
    pub success: bool,
}

impl TrackerResult {
    pub fn new(role: TrackerRole, success: bool) -> Self {
        Self { role, success }
    }
}

/// Anything keyed by tracker role inside a batch.
pub trait RoleKeyed {
    fn role(&self) -> TrackerRole;
}

impl RoleKeyed for TrackerUpdate {
    fn role(&self) -> TrackerRole {
        self.role
    }
}

impl RoleKeyed for TrackerState {
    fn role(&self) -> TrackerRole {
        self.role
    }
}

impl RoleKeyed for TrackerResult {
    fn role(&self) -> TrackerRole {
        self.role
    }
}

/// Collapses duplicate roles, last write wins.
///
/// Each surviving entry sits where its last occurrence was; relative order is
/// otherwise unchanged.
pub fn dedup_by_role<T: RoleKeyed>(batch: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::with_capacity(batch.len());
    let mut out: Vec<T> = batch
        .into_iter()
        .rev()
        .filter(|item| seen.insert(item.role()))
        .collect();
    out.reverse();
    out
}

/// Looks up the result for `role` in a batch reply.
pub fn result_for(results: &[TrackerResult], role: TrackerRole) -> Option<bool> {
    results.iter().find(|r| r.role == role).map(|r| r.success)
}
