//! Call and reply envelopes carried inside frames.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{RpcError, RpcResult};

/// One framed message on an RPC session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Envelope {
    Call(CallFrame),
    Reply(ReplyFrame),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallFrame {
    /// Zero for notifications; they are never answered.
    pub call_id: u32,
    pub method: String,
    pub want_reply: bool,
    /// Arguments encoded with [`encode_payload`].
    pub args: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyFrame {
    pub call_id: u32,
    pub outcome: Result<Vec<u8>, Fault>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultKind {
    MethodNotFound,
    InvalidArguments,
    HandlerFailed,
}

/// Failure reported by the callee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
}

impl Fault {
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::MethodNotFound,
            message: method.into(),
        }
    }

    pub fn invalid_arguments(msg: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::InvalidArguments,
            message: msg.into(),
        }
    }

    pub fn handler_failed(msg: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::HandlerFailed,
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl Envelope {
    pub fn encode(&self) -> RpcResult<Vec<u8>> {
        bincode::serialize(self).map_err(RpcError::encode)
    }

    pub fn decode(buf: &[u8]) -> RpcResult<Self> {
        bincode::deserialize(buf).map_err(RpcError::decode)
    }

    pub fn call_id(&self) -> u32 {
        match self {
            Envelope::Call(c) => c.call_id,
            Envelope::Reply(r) => r.call_id,
        }
    }
}

/// Encodes call arguments or a reply value.
pub fn encode_payload<T: Serialize + ?Sized>(value: &T) -> RpcResult<Vec<u8>> {
    bincode::serialize(value).map_err(RpcError::encode)
}

pub fn decode_payload<T: DeserializeOwned>(buf: &[u8]) -> RpcResult<T> {
    bincode::deserialize(buf).map_err(RpcError::decode)
}
