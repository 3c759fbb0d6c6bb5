use std::{
    sync::{Arc, atomic::AtomicUsize},
    time::Duration,
};

use alloy::{network::Network, providers::RootProvider};
use tokio::sync::watch;
use url::Url;

use crate::{
    SyncError,
    endpoint_pool::{Endpoint, EndpointPool},
};

/// Default per-attempt timeout used by [`EndpointPool`].
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(15);

/// Builder for constructing an [`EndpointPool`].
///
/// Endpoints are tried in the order they were added; the first one starts out active.
#[derive(Clone, Debug)]
pub struct EndpointPoolBuilder {
    urls: Vec<String>,
    call_timeout: Duration,
}

impl EndpointPoolBuilder {
    /// Create a builder from a list of endpoint URLs (`http(s)://` or `ws(s)://`).
    #[must_use]
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Append another endpoint behind the ones already configured.
    #[must_use]
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.urls.push(url.into());
        self
    }

    /// Set the timeout applied to each individual attempt.
    #[must_use]
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Build the pool.
    ///
    /// HTTP endpoints are created lazily and never fail here. WebSocket endpoints need a
    /// handshake and are connected during the build.
    ///
    /// # Errors
    ///
    /// * [`SyncError::NoEndpoints`] if no URL was configured.
    /// * [`SyncError::InvalidUrl`] if a URL cannot be parsed.
    /// * [`SyncError::Rpc`] if a WebSocket endpoint cannot be connected.
    pub async fn build<N: Network>(self) -> Result<EndpointPool<N>, SyncError> {
        if self.urls.is_empty() {
            return Err(SyncError::NoEndpoints);
        }

        debug!(
            endpoint_count = self.urls.len(),
            call_timeout_ms = self.call_timeout.as_millis(),
            "Building EndpointPool"
        );

        let mut endpoints = Vec::with_capacity(self.urls.len());
        for (index, raw) in self.urls.into_iter().enumerate() {
            let url: Url = raw.parse().map_err(|_| SyncError::InvalidUrl(raw.clone()))?;
            trace!(endpoint = index, url = %url, "Connecting endpoint");
            let provider = connect::<N>(&url).await?;
            endpoints.push(Endpoint { index, url, provider });
        }

        info!("EndpointPool initialized");

        Ok(EndpointPool {
            endpoints: endpoints.into(),
            active: Arc::new(AtomicUsize::new(0)),
            call_timeout: self.call_timeout,
            connected: Arc::new(watch::channel(true).0),
        })
    }
}

async fn connect<N: Network>(url: &Url) -> Result<RootProvider<N>, SyncError> {
    match url.scheme() {
        "http" | "https" => Ok(RootProvider::new_http(url.clone())),
        "ws" | "wss" => Ok(RootProvider::connect(url.as_str()).await?),
        _ => Err(SyncError::InvalidUrl(url.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::network::Ethereum;

    #[tokio::test]
    async fn builds_http_endpoints_in_order() -> anyhow::Result<()> {
        let pool = EndpointPoolBuilder::new(["http://node-a:8545", "https://node-b"])
            .endpoint("http://node-c:8545")
            .call_timeout(Duration::from_secs(3))
            .build::<Ethereum>()
            .await?;

        let hosts: Vec<_> = pool.endpoints().iter().map(|e| e.url().host_str().unwrap()).collect();
        assert_eq!(hosts, vec!["node-a", "node-b", "node-c"]);
        assert_eq!(pool.active_index(), 0);
        assert_eq!(pool.call_timeout(), Duration::from_secs(3));
        Ok(())
    }

    #[tokio::test]
    async fn rejects_empty_pool() {
        let result = EndpointPoolBuilder::new(Vec::<String>::new()).build::<Ethereum>().await;
        assert!(matches!(result, Err(SyncError::NoEndpoints)));
    }

    #[tokio::test]
    async fn rejects_unparsable_and_unknown_scheme_urls() {
        let result = EndpointPoolBuilder::new(["not a url"]).build::<Ethereum>().await;
        assert!(matches!(result, Err(SyncError::InvalidUrl(_))));

        let result = EndpointPoolBuilder::new(["ftp://node"]).build::<Ethereum>().await;
        assert!(matches!(result, Err(SyncError::InvalidUrl(_))));
    }
}
