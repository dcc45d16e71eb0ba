//! Framed RPC transport between the Amethyst plugin and its VR driver.
//!
//! Layers, bottom up:
//! - [`math`]: vector, quaternion and matrix payload types.
//! - [`frame`]: length-prefixed framing over a byte stream.
//! - [`session`]: call correlation, notifications and handler dispatch.
//! - [`endpoint`] and [`server`]: connecting, binding and the accept loop.
//! - [`protocol`] and [`client`]: the tracker method surface.

#![forbid(unsafe_code)]

pub mod client;
pub mod config;
pub mod endpoint;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod math;
pub mod protocol;
pub mod server;
pub mod session;

pub use client::{DriverClient, PingReport, PluginClient};
pub use config::RpcConfig;
pub use endpoint::{Endpoint, DEFAULT_TCP_PORT};
pub use envelope::{Fault, FaultKind};
pub use error::{ChannelError, RpcError, RpcResult};
pub use math::{Matrix4x4, Quaternion, Vector2, Vector3, Vector4};
pub use protocol::{
    Method, TrackerResult, TrackerRole, TrackerState, TrackerUpdate, TrackingState,
};
pub use server::{RpcServer, ServerHandle};
pub use session::{MethodKind, Router, RpcSession, SessionState};
