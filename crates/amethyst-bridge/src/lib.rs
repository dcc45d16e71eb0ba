//! Plugin side of the Amethyst driver link.
//!
//! [`DriverBridge`] owns the VR runtime lifecycle and the driver session and
//! reports their combined health as a [`ServiceStatus`].

#![forbid(unsafe_code)]

pub mod bridge;
pub mod error;
pub mod host;
pub mod status;

pub use bridge::{ConnectionTest, DriverBridge, RECONNECT_INTERVAL};
pub use error::{BridgeError, BridgeResult};
pub use host::VrHost;
pub use status::ServiceStatus;
