//! Transport and protocol errors.

use std::io;

use thiserror::Error;

use crate::envelope::{Fault, FaultKind};

/// Result alias for RPC operations.
pub type RpcResult<T> = Result<T, RpcError>;

/// Errors produced by the framed channel alone.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The peer closed the stream on a frame boundary.
    #[error("channel closed")]
    Closed,

    /// The stream ended or broke in the middle of a frame.
    #[error("framing error: {0}")]
    Framing(String),

    /// A frame header declared more bytes than the configured cap.
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    TooLarge { len: usize, max: usize },

    /// Any other I/O failure on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors surfaced to RPC callers.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The peer closed the connection cleanly.
    #[error("channel closed")]
    ChannelClosed,

    /// The stream was truncated mid-frame.
    #[error("framing error: {0}")]
    Framing(String),

    /// A frame exceeded the configured size cap.
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },

    /// The endpoint did not accept a connection within the timeout.
    #[error("connect timed out after {timeout_ms}ms")]
    ConnectTimeout { timeout_ms: u64 },

    /// The connection failed or was closed while the call was outstanding.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The callee has no handler for the method.
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// A payload could not be decoded into the expected types.
    #[error("decode error: {0}")]
    Decode(String),

    /// A value could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),

    /// The callee reported a failure.
    #[error("remote error: {0}")]
    Remote(String),

    /// No reply arrived within the caller's wait bound.
    #[error("call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The listener endpoint could not be created.
    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    /// Invalid endpoint string or configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RpcError {
    /// True when the error means "the driver cannot currently be reached".
    ///
    /// Callers treat these as retryable on their own schedule.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            RpcError::ChannelClosed
                | RpcError::ConnectTimeout { .. }
                | RpcError::ConnectionLost(_)
                | RpcError::Timeout { .. }
        )
    }

    pub fn decode(msg: impl std::fmt::Display) -> Self {
        RpcError::Decode(msg.to_string())
    }

    pub fn encode(msg: impl std::fmt::Display) -> Self {
        RpcError::Encode(msg.to_string())
    }

    pub fn connection_lost(msg: impl std::fmt::Display) -> Self {
        RpcError::ConnectionLost(msg.to_string())
    }
}

impl From<ChannelError> for RpcError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Closed => RpcError::ChannelClosed,
            ChannelError::Framing(msg) => RpcError::Framing(msg),
            ChannelError::TooLarge { len, max } => RpcError::FrameTooLarge { len, max },
            ChannelError::Io(e) => RpcError::ConnectionLost(e.to_string()),
        }
    }
}

impl From<Fault> for RpcError {
    fn from(fault: Fault) -> Self {
        match fault.kind {
            FaultKind::MethodNotFound => RpcError::MethodNotFound(fault.message),
            FaultKind::InvalidArguments => RpcError::Decode(fault.message),
            FaultKind::HandlerFailed => RpcError::Remote(fault.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_classification() {
        assert!(RpcError::ConnectTimeout { timeout_ms: 1000 }.is_unreachable());
        assert!(RpcError::connection_lost("reset").is_unreachable());
        assert!(RpcError::Timeout { timeout_ms: 5 }.is_unreachable());
        assert!(!RpcError::MethodNotFound("Nope".into()).is_unreachable());
        assert!(!RpcError::Remote("boom".into()).is_unreachable());
    }

    #[test]
    fn channel_errors_map_to_transport_taxonomy() {
        assert!(matches!(
            RpcError::from(ChannelError::Closed),
            RpcError::ChannelClosed
        ));
        assert!(matches!(
            RpcError::from(ChannelError::Framing("short".into())),
            RpcError::Framing(_)
        ));
        let io = io::Error::new(io::ErrorKind::BrokenPipe, "pipe");
        assert!(matches!(
            RpcError::from(ChannelError::Io(io)),
            RpcError::ConnectionLost(_)
        ));
    }

    #[test]
    fn faults_map_to_protocol_errors() {
        let err = RpcError::from(Fault::method_not_found("Missing"));
        assert!(matches!(err, RpcError::MethodNotFound(ref m) if m == "Missing"));

        let err = RpcError::from(Fault::invalid_arguments("bad args"));
        assert!(matches!(err, RpcError::Decode(_)));

        let err = RpcError::from(Fault::handler_failed("boom"));
        assert!(matches!(err, RpcError::Remote(_)));
    }
}
