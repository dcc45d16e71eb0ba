use thiserror::Error;

use amethyst_rpc::RpcError;

use crate::status::ServiceStatus;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("driver link unavailable: {0}")]
    Unavailable(ServiceStatus),

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

pub type BridgeResult<T> = Result<T, BridgeError>;
