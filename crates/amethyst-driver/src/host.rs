//! The VR runtime as seen from the driver.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use amethyst_rpc::{Quaternion, Vector3};
use tracing::{info, trace, warn};

use crate::error::{DriverError, DriverResult};

pub type DeviceIndex = u32;

/// Pose record pushed to the runtime for one device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DevicePose {
    pub position: Vector3,
    pub orientation: Quaternion,
    pub velocity: Vector3,
    pub acceleration: Vector3,
    pub angular_velocity: Vector3,
    pub angular_acceleration: Vector3,
    pub pose_is_valid: bool,
    pub device_is_connected: bool,
}

impl Default for DevicePose {
    fn default() -> Self {
        Self {
            position: Vector3::ZERO,
            orientation: Quaternion::IDENTITY,
            velocity: Vector3::ZERO,
            acceleration: Vector3::ZERO,
            angular_velocity: Vector3::ZERO,
            angular_acceleration: Vector3::ZERO,
            // An invalid pose makes some runtimes hide the device entirely.
            pose_is_valid: true,
            device_is_connected: false,
        }
    }
}

/// Calls the driver makes into the VR runtime.
pub trait DriverHost: Send + Sync + 'static {
    /// Registers a generic tracker device and returns its runtime index.
    fn add_tracker(&self, serial: &str, role_hint: &str) -> DriverResult<DeviceIndex>;

    fn pose_updated(&self, device: DeviceIndex, pose: &DevicePose);

    fn request_restart(&self, reason: &str);
}

/// Headless runtime that records devices and logs everything it is told.
#[derive(Default)]
pub struct LoggingHost {
    devices: Mutex<Vec<String>>,
    pose_updates: AtomicU64,
}

impl LoggingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device_count(&self) -> usize {
        match self.devices.lock() {
            Ok(devices) => devices.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn pose_updates(&self) -> u64 {
        self.pose_updates.load(Ordering::Relaxed)
    }
}

impl DriverHost for LoggingHost {
    fn add_tracker(&self, serial: &str, role_hint: &str) -> DriverResult<DeviceIndex> {
        let mut devices = match self.devices.lock() {
            Ok(devices) => devices,
            Err(poisoned) => poisoned.into_inner(),
        };
        if devices.iter().any(|s| s == serial) {
            return Err(DriverError::runtime(format!("device {serial} already added")));
        }
        // Index 0 belongs to the headset.
        let index = devices.len() as DeviceIndex + 1;
        devices.push(serial.to_string());
        info!("added tracker {} ({}) as device {}", serial, role_hint, index);
        Ok(index)
    }

    fn pose_updated(&self, device: DeviceIndex, pose: &DevicePose) {
        self.pose_updates.fetch_add(1, Ordering::Relaxed);
        trace!(
            "device {} pose {:?} valid={} connected={}",
            device,
            pose.position,
            pose.pose_is_valid,
            pose.device_is_connected
        );
    }

    fn request_restart(&self, reason: &str) {
        warn!("VR restart requested: {}", reason);
    }
}
