//! Worker RPC error types.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("connect to {address} failed: {reason}")]
    Connect { address: String, reason: String },

    #[error("rpc to {address} timed out after {timeout:?}")]
    Timeout { address: String, timeout: Duration },

    #[error("worker {address} returned HTTP {status}")]
    Status { address: String, status: u16 },

    #[error("malformed response from {address}: {reason}")]
    Decode { address: String, reason: String },

    #[error("http error: {0}")]
    Http(String),
}

impl RpcError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::Timeout { .. })
    }
}

pub type RpcResult<T> = Result<T, RpcError>;
