//! Pieces both Amethyst processes and the `ame` tool share: the log
//! subscriber and JSON config files.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;

pub use error::{Error, Result};

/// Installs the fmt subscriber. `RUST_LOG` wins over `default_level`.
///
/// The driver can be started by the VR runtime after a subscriber already
/// exists in the process; in that case this is a no-op.
pub fn init_logging(default_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
