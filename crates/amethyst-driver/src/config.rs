use std::path::Path;

use amethyst_rpc::{RpcConfig, TrackerRole};
use serde::{Deserialize, Serialize};

use crate::error::DriverResult;

pub const DEFAULT_FRAME_HZ: u32 = 90;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub rpc: RpcConfig,
    /// Rate at which spawned trackers are pushed to the runtime.
    pub frame_hz: u32,
    /// Roles the driver exposes, in registration order.
    pub trackers: Vec<TrackerRole>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            rpc: RpcConfig::default(),
            frame_hz: DEFAULT_FRAME_HZ,
            trackers: TrackerRole::ALL.to_vec(),
        }
    }
}

impl DriverConfig {
    pub fn load(path: Option<&Path>) -> DriverResult<Self> {
        let mut config: Self = amethyst_common::config::load_json_or_default(path)?;
        config.rpc.apply_env();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_expose_every_role_at_ninety_hz() {
        let cfg = DriverConfig::default();
        assert_eq!(cfg.frame_hz, 90);
        assert_eq!(cfg.trackers.len(), 13);
    }

    #[test]
    fn json_can_restrict_roles() {
        let cfg: DriverConfig =
            serde_json::from_str(r#"{"trackers":["Waist","LeftFoot"],"frame_hz":60}"#).unwrap();
        assert_eq!(cfg.trackers, vec![TrackerRole::Waist, TrackerRole::LeftFoot]);
        assert_eq!(cfg.frame_hz, 60);
        assert_eq!(cfg.rpc, RpcConfig::default());
    }
}
