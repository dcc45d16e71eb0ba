//! Per-role tracker slots owned by the driver.

use amethyst_rpc::{TrackerRole, TrackerState, TrackerUpdate};
use tracing::{debug, info, warn};

use crate::error::{DriverError, DriverResult};
use crate::host::{DeviceIndex, DevicePose, DriverHost};

/// One virtual tracker exposed to the VR runtime.
#[derive(Debug, Clone)]
pub struct BodyTracker {
    role: TrackerRole,
    serial: String,
    device: Option<DeviceIndex>,
    active: bool,
    valid: bool,
    pose: DevicePose,
}

impl BodyTracker {
    pub fn new(role: TrackerRole, serial: impl Into<String>) -> Self {
        Self {
            role,
            serial: serial.into(),
            device: None,
            active: false,
            valid: true,
            pose: DevicePose::default(),
        }
    }

    pub fn role(&self) -> TrackerRole {
        self.role
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn device(&self) -> Option<DeviceIndex> {
        self.device
    }

    pub fn is_added(&self) -> bool {
        self.device.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Registers the tracker with the runtime. Only the first call does anything.
    pub fn spawn<H: DriverHost + ?Sized>(&mut self, host: &H) -> DriverResult<DeviceIndex> {
        if let Some(device) = self.device {
            return Ok(device);
        }
        if self.serial.is_empty() {
            return Err(DriverError::Spawn {
                role: self.role,
                reason: "empty serial".to_string(),
            });
        }
        let device = host
            .add_tracker(&self.serial, &self.role.role_hint())
            .map_err(|e| DriverError::Spawn {
                role: self.role,
                reason: e.to_string(),
            })?;
        self.device = Some(device);
        Ok(device)
    }

    pub fn set_state(&mut self, active: bool) {
        self.active = active;
    }

    /// Stores the pose carried by `update`.
    ///
    /// Missing position or orientation keep their previous values; missing
    /// physics terms reset to zero.
    pub fn set_pose(&mut self, update: &TrackerUpdate) {
        if let Some(position) = update.position {
            self.pose.position = position;
        }
        if let Some(orientation) = update.orientation {
            self.pose.orientation = orientation;
        }
        self.pose.velocity = update.velocity.unwrap_or_default();
        self.pose.acceleration = update.acceleration.unwrap_or_default();
        self.pose.angular_velocity = update.angular_velocity.unwrap_or_default();
        self.pose.angular_acceleration = update.angular_acceleration.unwrap_or_default();
        self.valid = update.tracking_state.is_valid();
    }

    /// The pose as the runtime should see it right now.
    pub fn current_pose(&self) -> DevicePose {
        DevicePose {
            pose_is_valid: self.valid,
            device_is_connected: self.active,
            ..self.pose
        }
    }

    /// Pushes the current pose. Does nothing until the tracker is spawned.
    pub fn publish<H: DriverHost + ?Sized>(&self, host: &H) -> bool {
        match self.device {
            Some(device) => {
                host.pose_updated(device, &self.current_pose());
                true
            }
            None => false,
        }
    }
}

/// All trackers the driver serves, addressed by role.
#[derive(Debug, Clone)]
pub struct TrackerTable {
    trackers: Vec<BodyTracker>,
}

impl TrackerTable {
    /// One tracker per role, under its default serial.
    pub fn new(roles: &[TrackerRole]) -> Self {
        let mut trackers: Vec<BodyTracker> = Vec::with_capacity(roles.len());
        for role in roles {
            if trackers.iter().any(|t| t.role == *role) {
                continue;
            }
            trackers.push(BodyTracker::new(*role, role.default_serial()));
        }
        for tracker in &trackers {
            info!("registered tracker {} ({})", tracker.serial, tracker.role);
        }
        Self { trackers }
    }

    pub fn with_all_roles() -> Self {
        Self::new(&TrackerRole::ALL)
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    pub fn get(&self, role: TrackerRole) -> Option<&BodyTracker> {
        self.trackers.iter().find(|t| t.role == role)
    }

    fn get_mut(&mut self, role: TrackerRole) -> DriverResult<&mut BodyTracker> {
        self.trackers
            .iter_mut()
            .find(|t| t.role == role)
            .ok_or(DriverError::UnknownTracker(role))
    }

    /// Spawns the tracker if needed, applies the connection flag and publishes.
    pub fn set_state<H: DriverHost + ?Sized>(
        &mut self,
        state: &TrackerState,
        host: &H,
    ) -> DriverResult<()> {
        let tracker = self.get_mut(state.role)?;
        if !tracker.is_added() {
            tracker.spawn(host)?;
        }
        tracker.set_state(state.connection_state);
        debug!("tracker {} state set to {}", state.role, state.connection_state);
        tracker.publish(host);
        Ok(())
    }

    /// Stores a pose; it reaches the runtime on the next frame.
    pub fn update(&mut self, update: &TrackerUpdate) -> DriverResult<()> {
        let tracker = self.get_mut(update.role)?;
        if !tracker.is_added() && !update.serial.is_empty() && update.serial != tracker.serial {
            debug!(
                "tracker {} adopts serial {} before spawn",
                update.role, update.serial
            );
            tracker.serial = update.serial.clone();
        }
        tracker.set_pose(update);
        Ok(())
    }

    /// Publishes every spawned tracker. Returns how many were pushed.
    pub fn run_frame<H: DriverHost + ?Sized>(&self, host: &H) -> usize {
        self.trackers.iter().filter(|t| t.publish(host)).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BodyTracker> {
        self.trackers.iter()
    }
}

pub(crate) fn log_failure(role: TrackerRole, err: &DriverError) {
    warn!("tracker {} rejected: {}", role, err);
}
