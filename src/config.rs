//! File and environment configuration for [`SyncService`](crate::service::SyncService).
//!
//! Configuration is read from a TOML file and then overridden by `WALLET_SYNC__*`
//! environment variables, e.g. `WALLET_SYNC__CHAIN_ID=1` or
//! `WALLET_SYNC__RPC_URLS=https://a,https://b`.
//!
//! ```toml
//! chain-id = 11155111
//! rpc-urls = ["https://rpc.sepolia.org", "wss://sepolia.example/ws"]
//! clone-factory-address = "0x702B0b76235b1DAc489094184B7790cAA9A39Aa4"
//! token-address = "0x9A1a1F6F5b3D7a1F9b4e6C5B1d3E0aA0B1c2D3e4"
//!
//! [[indexers]]
//! url = "https://api-sepolia.etherscan.io/api"
//! kind = "etherscan"
//! ```

use std::{sync::Arc, time::Duration};

use ::config::{Case, Config, ConfigError, Environment, File, FileFormat};
use alloy::primitives::Address;
use serde::Deserialize;
use url::Url;

use crate::{
    SyncError,
    endpoint_pool::DEFAULT_CALL_TIMEOUT,
    events::DEFAULT_EVENT_BUS_CAPACITY,
    history::{
        DEFAULT_HISTORY_POLLING_INTERVAL, DEFAULT_PAGE_SIZE, DEFAULT_REQUEST_TIMEOUT,
        EtherscanCompatibleApi, Indexer, IndexerKind, TokenSymbols,
    },
    log_poller::DEFAULT_POLLING_INTERVAL,
};

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "WALLET_SYNC";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SyncConfig {
    pub chain_id: u64,
    pub rpc_urls: Vec<String>,
    /// Indexers queried in order. Defaults for `chain-id` are used when empty.
    #[serde(default)]
    pub indexers: Vec<IndexerConfig>,
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,
    #[serde(default = "default_history_polling_interval_ms")]
    pub history_polling_interval_ms: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    pub clone_factory_address: Address,
    pub token_address: Address,
    #[serde(default = "default_token_symbol")]
    pub token_symbol: String,
    #[serde(default = "default_native_symbol")]
    pub native_symbol: String,
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

/// One Etherscan-compatible indexer.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct IndexerConfig {
    pub url: String,
    #[serde(default)]
    pub kind: IndexerKind,
}

fn default_polling_interval_ms() -> u64 {
    millis(DEFAULT_POLLING_INTERVAL)
}

fn default_history_polling_interval_ms() -> u64 {
    millis(DEFAULT_HISTORY_POLLING_INTERVAL)
}

fn default_page_size() -> u64 {
    DEFAULT_PAGE_SIZE
}

fn default_call_timeout_ms() -> u64 {
    millis(DEFAULT_CALL_TIMEOUT)
}

fn default_token_symbol() -> String {
    TokenSymbols::default().token
}

fn default_native_symbol() -> String {
    TokenSymbols::default().native
}

fn default_event_bus_capacity() -> usize {
    DEFAULT_EVENT_BUS_CAPACITY
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Environment source for `WALLET_SYNC__*` overrides.
#[must_use]
pub fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .convert_case(Case::Kebab)
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("rpc-urls")
}

impl SyncConfig {
    /// Loads `path` (extension optional) and applies environment overrides.
    ///
    /// # Errors
    ///
    /// If the file cannot be read or a required key is missing or malformed.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        Self::from_sources(File::with_name(path), environment())
    }

    /// Parses a TOML document and applies environment overrides.
    ///
    /// # Errors
    ///
    /// See [`load`](Self::load).
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        Self::from_sources(File::from_str(toml, FileFormat::Toml), environment())
    }

    fn from_sources<F>(file: F, environment: Environment) -> Result<Self, ConfigError>
    where
        F: ::config::Source + Send + Sync + 'static,
    {
        let config: Self = Config::builder()
            .add_source(file)
            .add_source(environment)
            .build()?
            .try_deserialize()?;
        debug!(
            chain_id = config.chain_id,
            rpc_endpoints = config.rpc_urls.len(),
            indexers = config.indexers.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    #[must_use]
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    #[must_use]
    pub fn history_polling_interval(&self) -> Duration {
        Duration::from_millis(self.history_polling_interval_ms)
    }

    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    #[must_use]
    pub fn symbols(&self) -> TokenSymbols {
        TokenSymbols { token: self.token_symbol.clone(), native: self.native_symbol.clone() }
    }

    /// Indexer clients in query order: the configured ones, or the defaults of `chain-id`.
    ///
    /// # Errors
    ///
    /// * [`SyncError::UnsupportedChain`] if none are configured and the chain has no defaults.
    /// * [`SyncError::InvalidUrl`] if a configured URL cannot be parsed.
    /// * [`SyncError::Indexer`] if an HTTP client cannot be initialized.
    pub fn resolve_indexers(&self) -> Result<Vec<Arc<dyn Indexer>>, SyncError> {
        if self.indexers.is_empty() {
            info!(chain_id = self.chain_id, "No indexers configured, using chain defaults");
            return Ok(EtherscanCompatibleApi::defaults_for_chain(self.chain_id)?
                .into_iter()
                .map(|api| Arc::new(api) as Arc<dyn Indexer>)
                .collect());
        }

        self.indexers
            .iter()
            .map(|indexer| -> Result<Arc<dyn Indexer>, SyncError> {
                let url: Url =
                    indexer.url.parse().map_err(|_| SyncError::InvalidUrl(indexer.url.clone()))?;
                let timeout = DEFAULT_REQUEST_TIMEOUT;
                let api = EtherscanCompatibleApi::with_timeout(url, indexer.kind, timeout)?;
                Ok(Arc::new(api))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;
    use std::collections::HashMap;

    const MINIMAL: &str = r#"
        chain-id = 1
        rpc-urls = ["http://node-a:8545", "ws://node-b:8546"]
        clone-factory-address = "0x702b0b76235b1dac489094184b7790caa9a39aa4"
        token-address = "0x4b1d0b9f081468d780ca1d5d79132b64301085d1"
    "#;

    fn parse(toml: &str, env: &[(&str, &str)]) -> Result<SyncConfig, ConfigError> {
        let vars: HashMap<String, String> =
            env.iter().map(|(key, value)| ((*key).to_owned(), (*value).to_owned())).collect();
        let file = File::from_str(toml, FileFormat::Toml);
        SyncConfig::from_sources(file, environment().source(Some(vars)))
    }

    #[test]
    fn defaults_apply_to_omitted_keys() -> anyhow::Result<()> {
        let config = parse(MINIMAL, &[])?;

        assert_eq!(config.chain_id, 1);
        assert_eq!(config.rpc_urls, vec!["http://node-a:8545", "ws://node-b:8546"]);
        assert_eq!(
            config.clone_factory_address,
            address!("0x702b0b76235b1dac489094184b7790caa9a39aa4")
        );
        assert!(config.indexers.is_empty());
        assert_eq!(config.polling_interval(), Duration::from_millis(3000));
        assert_eq!(config.history_polling_interval(), Duration::from_millis(3000));
        assert_eq!(config.page_size, 50);
        assert_eq!(config.call_timeout(), Duration::from_secs(15));
        assert_eq!(config.token_symbol, "LMR");
        assert_eq!(config.native_symbol, "ETH");
        assert_eq!(config.event_bus_capacity, 128);
        Ok(())
    }

    #[test]
    fn indexers_section_is_parsed() -> anyhow::Result<()> {
        let toml = format!(
            "{MINIMAL}\n\
             [[indexers]]\nurl = \"https://eth.blockscout.com/api\"\nkind = \"blockscout\"\n\n\
             [[indexers]]\nurl = \"https://api.etherscan.io/api\"\n"
        );
        let config = parse(&toml, &[])?;

        assert_eq!(
            config.indexers,
            vec![
                IndexerConfig {
                    url: "https://eth.blockscout.com/api".into(),
                    kind: IndexerKind::Blockscout,
                },
                IndexerConfig {
                    url: "https://api.etherscan.io/api".into(),
                    kind: IndexerKind::Etherscan,
                },
            ]
        );
        let names: Vec<String> =
            config.resolve_indexers()?.iter().map(|i| i.name().to_owned()).collect();
        assert_eq!(names, vec!["eth.blockscout.com", "api.etherscan.io"]);
        Ok(())
    }

    #[test]
    fn environment_overrides_file_values() -> anyhow::Result<()> {
        let config = parse(
            MINIMAL,
            &[
                ("WALLET_SYNC__CHAIN_ID", "42161"),
                ("WALLET_SYNC__PAGE_SIZE", "20"),
                ("WALLET_SYNC__RPC_URLS", "https://a.example,https://b.example"),
            ],
        )?;

        assert_eq!(config.chain_id, 42_161);
        assert_eq!(config.page_size, 20);
        assert_eq!(config.rpc_urls, vec!["https://a.example", "https://b.example"]);
        Ok(())
    }

    #[test]
    fn missing_required_key_fails() {
        let result = parse("chain-id = 1\nrpc-urls = []", &[]);
        assert!(result.is_err());
    }

    #[test]
    fn default_indexers_follow_chain_id() -> anyhow::Result<()> {
        let mut config = parse(MINIMAL, &[])?;
        assert_eq!(config.resolve_indexers()?.len(), 2);

        config.chain_id = 42_161;
        assert_eq!(config.resolve_indexers()?.len(), 1);

        config.chain_id = 137;
        assert!(matches!(config.resolve_indexers(), Err(SyncError::UnsupportedChain(137))));
        Ok(())
    }

    #[test]
    fn unparsable_indexer_url_is_rejected() -> anyhow::Result<()> {
        let mut config = parse(MINIMAL, &[])?;
        config.indexers =
            vec![IndexerConfig { url: "not a url".into(), kind: IndexerKind::Etherscan }];
        assert!(matches!(config.resolve_indexers(), Err(SyncError::InvalidUrl(_))));
        Ok(())
    }
}
