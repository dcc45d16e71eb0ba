//! Stable numeric status reported to the host application.

use std::fmt;

use amethyst_rpc::RpcError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceStatus {
    Ok,
    /// The VR runtime could not be started.
    VrNotReady,
    /// Input actions failed to register; the driver link itself is fine.
    InputActionsFailed,
    /// Connect timed out, the connection dropped, or a ping failed.
    Unreachable,
    /// No driver session has been established yet.
    NotConnected,
    /// The driver reported a failure or the channel broke in another way.
    DriverException,
    /// Reserved so status codes stay stable for callers that persist them.
    /// The bridge itself never reports it.
    ServerFailure,
}

impl ServiceStatus {
    pub fn code(self) -> i32 {
        match self {
            ServiceStatus::Ok => 0,
            ServiceStatus::VrNotReady => 1,
            ServiceStatus::InputActionsFailed => 2,
            ServiceStatus::Unreachable => -1,
            ServiceStatus::NotConnected => -2,
            ServiceStatus::DriverException => -10,
            ServiceStatus::ServerFailure => 10,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => ServiceStatus::Ok,
            1 => ServiceStatus::VrNotReady,
            2 => ServiceStatus::InputActionsFailed,
            -1 => ServiceStatus::Unreachable,
            -2 => ServiceStatus::NotConnected,
            -10 => ServiceStatus::DriverException,
            10 => ServiceStatus::ServerFailure,
            _ => return None,
        })
    }

    pub fn message(self) -> &'static str {
        match self {
            ServiceStatus::Ok => "Success",
            ServiceStatus::VrNotReady => "OpenVR not ready",
            ServiceStatus::InputActionsFailed => "VR input actions could not be registered",
            ServiceStatus::Unreachable => "Driver unreachable",
            ServiceStatus::NotConnected => "Driver channel not established",
            ServiceStatus::DriverException => "Driver process exception",
            ServiceStatus::ServerFailure => "Driver run-time failure",
        }
    }

    pub fn is_ok(self) -> bool {
        self == ServiceStatus::Ok
    }

    /// Maps a failed call to the status it implies.
    pub fn from_error(err: &RpcError) -> Self {
        if err.is_unreachable() {
            ServiceStatus::Unreachable
        } else {
            ServiceStatus::DriverException
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}
