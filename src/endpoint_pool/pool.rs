use std::{
    fmt::Debug,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use alloy::{
    consensus::BlockHeader,
    eips::BlockNumberOrTag,
    network::{BlockResponse, Ethereum, Network},
    providers::{Provider, RootProvider},
    rpc::types::{Filter, Log},
    transports::{RpcError, TransportErrorKind},
};
use backon::Retryable;
use tokio::{sync::watch, time::timeout};
use url::Url;

use crate::endpoint_pool::{Error, backoff::RotationBackoffBuilder, classify};

/// One RPC connection target.
///
/// Endpoints are immutable: a failing endpoint is skipped by the pool's rotation, never
/// removed or rewired.
#[derive(Clone, Debug)]
pub struct Endpoint<N: Network = Ethereum> {
    pub(crate) index: usize,
    pub(crate) url: Url,
    pub(crate) provider: RootProvider<N>,
}

impl<N: Network> Endpoint<N> {
    /// Position of this endpoint in the pool.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub fn provider(&self) -> &RootProvider<N> {
        &self.provider
    }
}

/// Ordered set of RPC endpoints with stateful round-robin failover.
///
/// Every call goes through [`EndpointPool::execute`]. The pool is cheap to clone; clones
/// share the rotation cursor and the connection status.
#[derive(Clone, Debug)]
pub struct EndpointPool<N: Network = Ethereum> {
    pub(crate) endpoints: Arc<[Endpoint<N>]>,
    /// Index of the endpoint that served the most recent successful call.
    pub(crate) active: Arc<AtomicUsize>,
    pub(crate) call_timeout: Duration,
    pub(crate) connected: Arc<watch::Sender<bool>>,
}

impl<N: Network> EndpointPool<N> {
    #[must_use]
    pub fn endpoints(&self) -> &[Endpoint<N>] {
        &self.endpoints
    }

    /// Index of the endpoint the next call will start from.
    #[must_use]
    pub fn active_index(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn active_endpoint(&self) -> &Endpoint<N> {
        &self.endpoints[self.active_index()]
    }

    /// Per-attempt timeout applied to every call.
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Receiver that observes `false` once a call exhausted the pool with a retryable
    /// failure and `true` again after the next success.
    #[must_use]
    pub fn connection_status(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    /// Fetch logs for the given [`Filter`].
    ///
    /// # Errors
    ///
    /// See [execute errors](#execute-errors).
    pub async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, Error> {
        debug!("eth_getLogs called");
        let result = self
            .execute(move |endpoint| async move { endpoint.provider.get_logs(filter).await })
            .await;
        if let Err(e) = &result {
            error!(error = %e, "eth_getLogs failed");
        }
        result
    }

    /// Fetch the latest block number.
    ///
    /// # Errors
    ///
    /// See [execute errors](#execute-errors).
    pub async fn get_block_number(&self) -> Result<u64, Error> {
        debug!("eth_blockNumber called");
        let result = self
            .execute(|endpoint| async move { endpoint.provider.get_block_number().await })
            .await;
        if let Err(e) = &result {
            error!(error = %e, "eth_blockNumber failed");
        }
        result
    }

    /// Fetch a block by [`BlockNumberOrTag`].
    ///
    /// # Errors
    ///
    /// See [execute errors](#execute-errors). Returns [`Error::BlockNotFound`] when the node
    /// does not know the block.
    pub async fn get_block_by_number(
        &self,
        number: BlockNumberOrTag,
    ) -> Result<N::BlockResponse, Error> {
        debug!(block = %number, "eth_getBlockByNumber called");
        let result = self
            .execute(move |endpoint| async move {
                endpoint.provider.get_block_by_number(number).await
            })
            .await;
        if let Err(e) = &result {
            error!(error = %e, "eth_getBlockByNumber failed");
        }
        result?.ok_or_else(|| Error::BlockNotFound(number.into()))
    }

    /// Number of the `latest` block, read from its header. Used to seed poll cursors.
    ///
    /// # Errors
    ///
    /// See [`get_block_by_number`](Self::get_block_by_number).
    pub async fn get_latest_block_number(&self) -> Result<u64, Error> {
        let block = self.get_block_by_number(BlockNumberOrTag::Latest).await?;
        Ok(block.header().number())
    }

    /// Execute `operation` against the active endpoint, rotating on retryable failures.
    ///
    /// * On success the endpoint that answered becomes the active one for later calls.
    /// * On a retryable failure (timeout, transport fault, rate-limit signature) the pool
    ///   moves to the next endpoint, waits a delay from
    ///   [`ROTATION_DELAYS`](crate::endpoint_pool::ROTATION_DELAYS) and tries again.
    /// * A non-retryable failure is returned right away and the active endpoint stays.
    ///
    /// Each attempt is bounded by the pool's call timeout.
    ///
    /// # Errors
    /// <a name="execute-errors"></a>
    ///
    /// * The last observed [`Error`] once `2 * endpoints` attempts failed.
    /// * Any non-retryable [`Error::RpcError`] as soon as it is observed.
    pub async fn execute<T: Debug, F, Fut>(&self, operation: F) -> Result<T, Error>
    where
        F: Fn(Endpoint<N>) -> Fut,
        Fut: Future<Output = Result<T, RpcError<TransportErrorKind>>>,
    {
        let len = self.endpoints.len();
        // cursor local to this logical call; published to `active` only on success
        let current = AtomicUsize::new(self.active_index() % len);
        let backoff = RotationBackoffBuilder::for_endpoints(len);

        let result = (|| {
            let endpoint = self.endpoints[current.load(Ordering::Acquire)].clone();
            let call_timeout = self.call_timeout;
            let operation = &operation;
            async move {
                trace!(endpoint = endpoint.index, url = %endpoint.url, "Executing RPC call");
                timeout(call_timeout, operation(endpoint)).await?.map_err(Error::from)
            }
        })
        .retry(backoff)
        .when(Error::is_retryable)
        .notify(|err: &Error, delay: Duration| {
            let failed = current.load(Ordering::Acquire);
            let next = (failed + 1) % len;
            current.store(next, Ordering::Release);
            warn!(
                failed_endpoint = failed,
                next_endpoint = next,
                rate_limited = Self::rate_limited(err),
                delay_ms = delay.as_millis(),
                error = %err,
                "Endpoint failed, rotating"
            );
        })
        .sleep(tokio::time::sleep)
        .await;

        match &result {
            Ok(_) => {
                let index = current.load(Ordering::Acquire);
                self.active.store(index, Ordering::Release);
                self.set_connected(true);
            }
            Err(err) if err.is_retryable() => {
                error!(
                    attempts = backoff.max_retries() + 1,
                    error = %err,
                    "All endpoints failed - returning the last endpoint's error"
                );
                self.set_connected(false);
            }
            Err(err) => {
                debug!(error = %err, "Non-retryable RPC failure");
            }
        }

        result
    }

    fn rate_limited(err: &Error) -> bool {
        match err {
            Error::RpcError(err) => classify::is_rate_limited(err),
            _ => false,
        }
    }

    fn set_connected(&self, connected: bool) {
        self.connected.send_if_modified(|current| {
            if *current == connected {
                return false;
            }
            info!(connected = connected, "Connection status changed");
            *current = connected;
            true
        });
    }
}
