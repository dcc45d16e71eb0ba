use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::endpoint::Endpoint;
use crate::frame::{ChannelOptions, DEFAULT_MAX_FRAME_LEN, DEFAULT_OUTBOX_CAPACITY};

/// Overrides [`RpcConfig::endpoint`] when set.
pub const ENDPOINT_ENV: &str = "AMETHYST_ENDPOINT";

pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 2000;

/// Transport settings shared by the driver and the plugin side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub endpoint: Endpoint,
    pub connect_timeout_ms: u64,
    /// Upper bound for calls that wait on a reply (ping, restart requests).
    pub call_timeout_ms: u64,
    pub max_frame_len: usize,
    pub outbox_capacity: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::platform_default(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
        }
    }
}

impl RpcConfig {
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Applies `AMETHYST_ENDPOINT` if it holds a valid endpoint.
    pub fn apply_env(&mut self) {
        if let Ok(value) = std::env::var(ENDPOINT_ENV) {
            self.apply_endpoint_override(&value);
        }
    }

    fn apply_endpoint_override(&mut self, value: &str) {
        match value.parse() {
            Ok(endpoint) => self.endpoint = endpoint,
            Err(e) => warn!("ignoring {}={:?}: {}", ENDPOINT_ENV, value, e),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn channel_options(&self) -> ChannelOptions {
        ChannelOptions {
            max_frame_len: self.max_frame_len,
            outbox_capacity: self.outbox_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_transport_constants() {
        let cfg = RpcConfig::default();
        assert_eq!(cfg.connect_timeout(), Duration::from_secs(1));
        assert_eq!(cfg.max_frame_len, 4 * 1024 * 1024);
        assert_eq!(cfg.endpoint, Endpoint::platform_default());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: RpcConfig =
            serde_json::from_str(r#"{"endpoint":"tcp://127.0.0.1:9100","call_timeout_ms":250}"#)
                .unwrap();
        assert_eq!(cfg.endpoint, Endpoint::tcp_loopback(9100));
        assert_eq!(cfg.call_timeout(), Duration::from_millis(250));
        assert_eq!(cfg.connect_timeout_ms, DEFAULT_CONNECT_TIMEOUT_MS);
    }

    #[test]
    fn invalid_override_is_ignored() {
        let mut cfg = RpcConfig::default();
        cfg.apply_endpoint_override("tcp://127.0.0.1:9200");
        assert_eq!(cfg.endpoint, Endpoint::tcp_loopback(9200));

        cfg.apply_endpoint_override("bogus://x");
        assert_eq!(cfg.endpoint, Endpoint::tcp_loopback(9200));
    }
}
