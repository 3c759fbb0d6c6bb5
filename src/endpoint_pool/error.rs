use std::sync::Arc;

use alloy::{
    eips::BlockId,
    transports::{RpcError, TransportErrorKind},
};
use thiserror::Error;
use tokio::time::error::Elapsed;

use crate::endpoint_pool::classify;

/// Failure of a single logical call routed through the [`EndpointPool`].
///
/// [`EndpointPool`]: crate::endpoint_pool::EndpointPool
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Operation timed out")]
    Timeout,
    #[error("RPC call failed: {0}")]
    RpcError(Arc<RpcError<TransportErrorKind>>),
    #[error("Block not found, Block Id: {0}")]
    BlockNotFound(BlockId),
}

impl Error {
    /// Whether the endpoint pool should rotate to the next endpoint and try again.
    ///
    /// Timeouts and transport faults are always retryable. JSON-RPC error responses are only
    /// retryable when they carry a rate-limit signature.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Timeout => true,
            Error::RpcError(err) => classify::is_retryable(err),
            Error::BlockNotFound(_) => false,
        }
    }
}

impl From<RpcError<TransportErrorKind>> for Error {
    fn from(err: RpcError<TransportErrorKind>) -> Self {
        Error::RpcError(Arc::new(err))
    }
}

impl From<Elapsed> for Error {
    fn from(_: Elapsed) -> Self {
        Error::Timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::rpc::json_rpc::ErrorPayload;

    #[test]
    fn non_retryable_failure_reads_as_a_plain_rpc_failure() {
        let err: Error = RpcError::ErrorResp(ErrorPayload {
            code: 3,
            message: "execution reverted".into(),
            data: None,
        })
        .into();

        assert!(!err.is_retryable());
        let message = err.to_string();
        assert!(message.starts_with("RPC call failed: "));
        assert!(message.contains("execution reverted"));
    }
}
