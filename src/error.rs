use std::sync::Arc;

use alloy::{
    eips::BlockId,
    providers::PendingTransactionError,
    transports::{RpcError, TransportErrorKind},
};
use thiserror::Error;

use crate::{endpoint_pool::Error as EndpointPoolError, history::IndexerError};

/// Errors produced by the sync layer.
///
/// `SyncError` values are returned by builders and one-shot calls, and are also yielded by
/// watch streams (as `Err(SyncError)` items). Errors yielded by a watch stream are reported
/// per cycle: the loop keeps running and retries from the same cursor.
#[derive(Error, Debug, Clone)]
pub enum SyncError {
    /// The underlying RPC transport returned an error.
    #[error("RPC error: {0}")]
    Rpc(Arc<RpcError<TransportErrorKind>>),

    /// A timeout elapsed while waiting for an RPC response.
    #[error("Operation timed out")]
    Timeout,

    /// A requested block could not be retrieved.
    #[error("Block not found, Block Id: {0}")]
    BlockNotFound(BlockId),

    /// Every configured indexer failed, or an indexer returned an unusable response.
    #[error("Indexer error: {0}")]
    Indexer(#[from] IndexerError),

    /// A submitted transaction failed before its receipt was available.
    #[error("Transaction submission failed: {0}")]
    Submission(Arc<PendingTransactionError>),

    /// A watch loop was started while a previous one is still running.
    #[error("Already started")]
    AlreadyStarted,

    /// The contract subscription registry was fetched before it was created.
    #[error("Contract subscription registry instance not created")]
    RegistryNotCreated,

    /// The configured polling interval is invalid (must be greater than zero).
    #[error("Polling interval must be greater than 0")]
    InvalidPollingInterval,

    /// The configured page size is invalid (must be greater than zero).
    #[error("Page size must be greater than 0")]
    InvalidPageSize,

    /// The configured stream buffer capacity is invalid (must be greater than zero).
    #[error("Stream buffer capacity must be greater than 0")]
    InvalidBufferCapacity,

    /// No RPC endpoint was configured.
    #[error("At least one RPC endpoint is required")]
    NoEndpoints,

    /// No indexer was configured.
    #[error("At least one indexer is required")]
    NoIndexers,

    /// A configured URL could not be parsed or uses an unsupported scheme.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// No default indexers are known for the chain.
    #[error("Unsupported chain {0}")]
    UnsupportedChain(u64),
}

impl From<EndpointPoolError> for SyncError {
    fn from(error: EndpointPoolError) -> SyncError {
        match error {
            EndpointPoolError::Timeout => SyncError::Timeout,
            EndpointPoolError::RpcError(err) => SyncError::Rpc(err),
            EndpointPoolError::BlockNotFound(block) => SyncError::BlockNotFound(block),
        }
    }
}

impl From<RpcError<TransportErrorKind>> for SyncError {
    fn from(error: RpcError<TransportErrorKind>) -> Self {
        SyncError::Rpc(Arc::new(error))
    }
}

impl From<PendingTransactionError> for SyncError {
    fn from(error: PendingTransactionError) -> Self {
        SyncError::Submission(Arc::new(error))
    }
}
