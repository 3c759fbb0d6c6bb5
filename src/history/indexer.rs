use std::{fmt::Debug, sync::Arc, time::Duration};

use alloy::primitives::Address;
use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::SyncError;

/// Default per-request timeout of the HTTP indexer client.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Envelope message that indexers use for an empty, successful result.
pub const NO_TRANSACTIONS_FOUND: &str = "No transactions found";

#[derive(Error, Debug, Clone)]
pub enum IndexerError {
    #[error("Indexer request failed: {0}")]
    Http(Arc<reqwest::Error>),
    #[error("Indexer responded with {message}: {result}")]
    Api { message: String, result: String },
    #[error("Malformed indexer response: {0}")]
    Decode(String),
    #[error("Tried all of the indexers without success, last error: {0}")]
    AllSourcesFailed(Box<IndexerError>),
}

impl From<reqwest::Error> for IndexerError {
    fn from(err: reqwest::Error) -> Self {
        IndexerError::Http(Arc::new(err))
    }
}

/// Block range, paging and addresses of one indexer query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferQuery {
    pub from_block: u64,
    /// `None` queries up to the latest indexed block.
    pub to_block: Option<u64>,
    /// 1-based page number.
    pub page: u64,
    pub page_size: u64,
    /// Wallet address.
    pub address: Address,
    /// Token contract, only used for token-transfer queries.
    pub token_address: Address,
}

/// Raw token-transfer item (`action=tokentx`).
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenTransfer {
    pub hash: String,
    pub block_number: String,
    pub time_stamp: String,
    pub from: String,
    pub to: String,
    pub value: String,
    pub gas_price: String,
    pub gas_used: String,
}

/// Raw native-currency transaction item (`action=txlist`).
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeTransaction {
    pub hash: String,
    pub block_number: String,
    pub time_stamp: String,
    pub from: String,
    /// Empty for contract creations.
    #[serde(default)]
    pub to: String,
    pub value: String,
    pub gas_price: String,
    pub gas_used: String,
    /// Not reported by Blockscout.
    #[serde(default)]
    pub method_id: Option<String>,
    #[serde(default)]
    pub input: String,
}

impl NativeTransaction {
    /// Hex method selector of the call, taken from `methodId` or the head of `input`.
    #[must_use]
    pub fn selector(&self) -> Option<&str> {
        match self.method_id.as_deref() {
            Some(id) if id.len() >= 10 => Some(id),
            _ => self.input.get(..10),
        }
    }
}

/// A source of pre-indexed wallet history.
#[async_trait]
pub trait Indexer: Send + Sync + Debug {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    async fn token_transfers(
        &self,
        query: TransferQuery,
    ) -> Result<Vec<TokenTransfer>, IndexerError>;

    async fn native_transactions(
        &self,
        query: TransferQuery,
    ) -> Result<Vec<NativeTransaction>, IndexerError>;
}

/// Query-parameter dialect of an Etherscan-compatible API.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndexerKind {
    /// Etherscan and its forks (Arbiscan): `startBlock` / `endBlock`.
    #[default]
    Etherscan,
    /// Blockscout: `start_block` / `end_block`.
    Blockscout,
}

impl IndexerKind {
    fn block_params(self) -> (&'static str, &'static str) {
        match self {
            IndexerKind::Etherscan => ("startBlock", "endBlock"),
            IndexerKind::Blockscout => ("start_block", "end_block"),
        }
    }
}

/// Default indexer endpoints for a chain.
///
/// # Errors
///
/// Returns [`SyncError::UnsupportedChain`] for chains without known indexers.
pub fn default_indexers(chain_id: u64) -> Result<Vec<(&'static str, IndexerKind)>, SyncError> {
    use IndexerKind::{Blockscout, Etherscan};
    let indexers = match chain_id {
        1 => vec![
            ("https://api.etherscan.io/api", Etherscan),
            ("https://eth.blockscout.com/api", Blockscout),
        ],
        5 => vec![
            ("https://api-goerli.etherscan.io/api", Etherscan),
            ("https://eth-goerli.blockscout.com/api", Blockscout),
        ],
        11_155_111 => vec![
            ("https://api-sepolia.etherscan.io/api", Etherscan),
            ("https://eth-sepolia.blockscout.com/api", Blockscout),
        ],
        42_161 => vec![("https://api.arbiscan.io/api", Etherscan)],
        421_613 => vec![("https://api-goerli.arbiscan.io/api", Etherscan)],
        other => return Err(SyncError::UnsupportedChain(other)),
    };
    Ok(indexers)
}

/// HTTP client for Etherscan-compatible `account` endpoints.
#[derive(Clone, Debug)]
pub struct EtherscanCompatibleApi {
    name: String,
    base_url: Url,
    kind: IndexerKind,
    client: reqwest::Client,
}

impl EtherscanCompatibleApi {
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be initialized.
    pub fn new(base_url: Url, kind: IndexerKind) -> Result<Self, IndexerError> {
        Self::with_timeout(base_url, kind, DEFAULT_REQUEST_TIMEOUT)
    }

    /// # Errors
    ///
    /// Fails if the HTTP client cannot be initialized.
    pub fn with_timeout(
        base_url: Url,
        kind: IndexerKind,
        timeout: Duration,
    ) -> Result<Self, IndexerError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let name = base_url.host_str().unwrap_or("indexer").to_owned();
        Ok(Self { name, base_url, kind, client })
    }

    /// Clients for the default indexers of `chain_id`, see [`default_indexers`].
    ///
    /// # Errors
    ///
    /// * [`SyncError::UnsupportedChain`] for unknown chains.
    /// * [`SyncError::Indexer`] if an HTTP client cannot be initialized.
    pub fn defaults_for_chain(chain_id: u64) -> Result<Vec<Self>, SyncError> {
        default_indexers(chain_id)?
            .into_iter()
            .map(|(url, kind)| -> Result<Self, SyncError> {
                let url: Url = url.parse().map_err(|_| SyncError::InvalidUrl(url.to_owned()))?;
                Ok(Self::new(url, kind)?)
            })
            .collect()
    }

    #[must_use]
    pub fn kind(&self) -> IndexerKind {
        self.kind
    }

    fn query_params(
        &self,
        action: &'static str,
        query: &TransferQuery,
    ) -> Vec<(&'static str, String)> {
        let (start, end) = self.kind.block_params();
        let mut params = vec![("module", "account".to_owned()), ("action", action.to_owned())];
        if action == "tokentx" {
            params.push(("contractaddress", query.token_address.to_string()));
        }
        params.extend([
            (start, query.from_block.to_string()),
            (end, query.to_block.map_or_else(|| "latest".to_owned(), |b| b.to_string())),
            ("address", query.address.to_string()),
            ("page", query.page.to_string()),
            ("offset", query.page_size.to_string()),
            ("sort", "desc".to_owned()),
        ]);
        params
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        action: &'static str,
        query: &TransferQuery,
    ) -> Result<Vec<T>, IndexerError> {
        let params = self.query_params(action, query);
        trace!(indexer = %self.name, action = action, page = query.page, "Querying indexer");
        let body = self
            .client
            .get(self.base_url.clone())
            .query(&params)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_envelope(&body)
    }
}

#[async_trait]
impl Indexer for EtherscanCompatibleApi {
    fn name(&self) -> &str {
        &self.name
    }

    async fn token_transfers(
        &self,
        query: TransferQuery,
    ) -> Result<Vec<TokenTransfer>, IndexerError> {
        self.fetch("tokentx", &query).await
    }

    async fn native_transactions(
        &self,
        query: TransferQuery,
    ) -> Result<Vec<NativeTransaction>, IndexerError> {
        self.fetch("txlist", &query).await
    }
}

#[derive(Deserialize)]
struct Envelope {
    status: String,
    message: String,
    #[serde(default)]
    result: Value,
}

/// Checks the `{status, message, result}` envelope and decodes the result items.
/// Items that do not decode are skipped.
fn parse_envelope<T: DeserializeOwned>(body: &str) -> Result<Vec<T>, IndexerError> {
    let envelope: Envelope =
        serde_json::from_str(body).map_err(|err| IndexerError::Decode(err.to_string()))?;

    if envelope.status != "1" && envelope.message != NO_TRANSACTIONS_FOUND {
        let result = match envelope.result {
            Value::String(result) => result,
            other => other.to_string(),
        };
        return Err(IndexerError::Api { message: envelope.message, result });
    }

    let items = match envelope.result {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        _ if envelope.message == NO_TRANSACTIONS_FOUND => Vec::new(),
        other => return Err(IndexerError::Decode(format!("expected a result list, got {other}"))),
    };

    Ok(items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(item) => Some(item),
            Err(err) => {
                warn!(error = %err, "Skipping malformed indexer item");
                None
            }
        })
        .collect())
}
