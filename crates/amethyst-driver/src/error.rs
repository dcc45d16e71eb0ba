use thiserror::Error;

use amethyst_rpc::{RpcError, TrackerRole};

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("tracker {0} is not registered with this driver")]
    UnknownTracker(TrackerRole),

    #[error("could not spawn tracker {role}: {reason}")]
    Spawn { role: TrackerRole, reason: String },

    #[error("VR runtime error: {0}")]
    Runtime(String),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Config(#[from] amethyst_common::Error),
}

impl DriverError {
    pub fn runtime(msg: impl Into<String>) -> Self {
        DriverError::Runtime(msg.into())
    }
}

pub type DriverResult<T> = Result<T, DriverError>;
