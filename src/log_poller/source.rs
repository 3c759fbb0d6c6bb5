use alloy::{
    network::Network,
    rpc::types::{Filter, Log},
};
use async_trait::async_trait;

use crate::{SyncError, endpoint_pool::EndpointPool};

/// Where pollers read logs from.
#[async_trait]
pub trait LogSource: Send + Sync + 'static {
    /// Logs matching `filter`.
    ///
    /// # Errors
    ///
    /// Any failure of the underlying query.
    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, SyncError>;
}

#[async_trait]
impl<N: Network> LogSource for EndpointPool<N> {
    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, SyncError> {
        Ok(self.get_logs(filter).await?)
    }
}
