//! Wires the sync components to one [`EventBus`].
//!
//! [`SyncService`] owns the endpoint pool, a [`ChainLogPoller`] on the clone factory, the
//! wallet's [`TransactionHistory`] and a shared [`ContractSubscriptionRegistry`], and turns
//! their streams into [`WalletEvent`]s:
//!
//! | source                        | event                                  |
//! |-------------------------------|----------------------------------------|
//! | clone factory logs            | [`WalletEvent::ContractUpdated`]       |
//! | registry subscriptions        | [`WalletEvent::ContractUpdated`]       |
//! | history watch pages           | [`WalletEvent::TokenTransactionsChanged`] |
//! | pool connection status        | [`WalletEvent::ConnectionStatusChanged`] |
//! | any stream error              | [`WalletEvent::WalletError`]           |

use std::sync::{Arc, Mutex, PoisonError};

use alloy::{
    network::Ethereum,
    primitives::Address,
    providers::{PendingTransactionBuilder, PendingTransactionError},
    rpc::types::TransactionReceipt,
};
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_stream::{StreamExt, wrappers::ReceiverStream};
use tokio_util::sync::CancellationToken;

use crate::{
    SyncError, SyncMessage, SyncResult,
    config::SyncConfig,
    endpoint_pool::{EndpointPool, EndpointPoolBuilder},
    events::{Component, EventBus, WalletEvent},
    history::{
        SentCall, TransactionHistory, TransactionHistoryBuilder, TransactionPage, TransactionRecord,
    },
    log_poller::{ChainLogPoller, ChainLogPollerBuilder, ContractChange},
    registry::ContractSubscriptionRegistry,
};

#[derive(Debug)]
pub struct SyncService {
    wallet: Address,
    pool: EndpointPool,
    contracts: ChainLogPoller,
    history: TransactionHistory,
    registry: Arc<ContractSubscriptionRegistry>,
    bus: EventBus,
    forwarders: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl SyncService {
    /// Builds every component for `wallet` from `config` with a registry of its own.
    ///
    /// # Errors
    ///
    /// Any error of [`EndpointPoolBuilder::build`], [`SyncConfig::resolve_indexers`] or the
    /// component builders.
    pub async fn from_config(config: &SyncConfig, wallet: Address) -> Result<Self, SyncError> {
        let pool = EndpointPoolBuilder::new(config.rpc_urls.iter().cloned())
            .call_timeout(config.call_timeout())
            .build::<Ethereum>()
            .await?;
        let registry = Arc::new(ContractSubscriptionRegistry::with_polling_interval(
            Arc::new(pool.clone()),
            config.polling_interval(),
        ));
        Self::with_registry(config, wallet, pool, registry)
    }

    /// Like [`from_config`](Self::from_config) with an existing pool and registry.
    ///
    /// # Errors
    ///
    /// See [`from_config`](Self::from_config).
    pub fn with_registry(
        config: &SyncConfig,
        wallet: Address,
        pool: EndpointPool,
        registry: Arc<ContractSubscriptionRegistry>,
    ) -> Result<Self, SyncError> {
        let bus = EventBus::new(config.event_bus_capacity)?;
        let contracts = ChainLogPollerBuilder::new(config.clone_factory_address)
            .polling_interval(config.polling_interval())
            .build(Arc::new(pool.clone()))?;
        let history = TransactionHistoryBuilder::new(config.token_address)
            .indexers(config.resolve_indexers()?)
            .symbols(config.symbols())
            .polling_interval(config.history_polling_interval())
            .page_size(config.page_size)
            .build()?;
        Ok(Self::from_parts(wallet, pool, contracts, history, registry, bus))
    }

    /// Assembles a service from prebuilt components. Registry updates and poll errors are
    /// routed to `bus`.
    #[must_use]
    pub fn from_parts(
        wallet: Address,
        pool: EndpointPool,
        contracts: ChainLogPoller,
        history: TransactionHistory,
        registry: Arc<ContractSubscriptionRegistry>,
        bus: EventBus,
    ) -> Self {
        let updates = bus.clone();
        registry.set_on_update(move |address| {
            updates.emit(WalletEvent::ContractUpdated { address });
        });
        let errors = bus.clone();
        registry.set_on_error(move |address, err| {
            errors.error(Component::Registry, format!("Could not poll events of {address}"), err);
        });

        Self {
            wallet,
            pool,
            contracts,
            history,
            registry,
            bus,
            forwarders: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn wallet(&self) -> Address {
        self.wallet
    }

    #[must_use]
    pub fn pool(&self) -> &EndpointPool {
        &self.pool
    }

    #[must_use]
    pub fn history(&self) -> &TransactionHistory {
        &self.history
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ContractSubscriptionRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.bus.subscribe()
    }

    /// Seeds both cursors with the latest block and starts the clone factory poller, the
    /// history watch and connection status forwarding.
    ///
    /// # Errors
    ///
    /// * [`SyncError::Rpc`] / [`SyncError::Timeout`] if the latest block cannot be read.
    /// * [`SyncError::AlreadyStarted`] if the service is running.
    pub async fn start(&self) -> Result<(), SyncError> {
        if self.contracts.is_watching() || self.history.is_watching() {
            return Err(SyncError::AlreadyStarted);
        }

        let from_block = self.pool.get_latest_block_number().await?;
        info!(wallet = %self.wallet, from_block = from_block, "Starting sync service");

        let contracts = self.contracts.start_watching(from_block)?;
        let history = match self.history.start_watching(self.wallet, from_block) {
            Ok(stream) => stream,
            Err(err) => {
                self.contracts.stop_watching().await;
                return Err(err);
            }
        };

        let handles = [
            tokio::spawn(forward_contracts(contracts, self.bus.clone())),
            tokio::spawn(forward_history(history, self.bus.clone())),
            tokio::spawn(forward_connection_status(
                self.pool.clone(),
                self.bus.clone(),
                self.cancel.child_token(),
            )),
        ];
        self.forwarders.lock().unwrap_or_else(PoisonError::into_inner).extend(handles);
        Ok(())
    }

    /// Subscribes every contract in `ids` through the registry and asks consumers to
    /// re-fetch each of them.
    ///
    /// Emits [`WalletEvent::ContractsScanStarted`], one [`WalletEvent::ContractUpdated`]
    /// per id and [`WalletEvent::ContractsScanFinished`]. New subscriptions start at the clone
    /// factory poller's cursor.
    ///
    /// # Errors
    ///
    /// See [`ContractSubscriptionRegistry::add_contract`].
    pub fn refresh_contracts(
        &self,
        ids: impl IntoIterator<Item = Address>,
    ) -> Result<(), SyncError> {
        let from_block = self.contracts.cursor();
        self.bus.emit(WalletEvent::ContractsScanStarted);

        for address in ids {
            if let Err(err) = self.registry.add_contract(address, from_block) {
                self.bus.error(Component::Registry, "Could not subscribe to contract", err.clone());
                return Err(err);
            }
            self.bus.emit(WalletEvent::ContractUpdated { address });
        }

        self.bus.emit(WalletEvent::ContractsScanFinished);
        Ok(())
    }

    /// Fetches one page of the wallet's whole history and emits
    /// [`WalletEvent::TransactionsNextPage`].
    ///
    /// # Errors
    ///
    /// See [`TransactionHistory::get_transactions`]. The error is also emitted.
    pub async fn next_page(
        &self,
        page: u64,
        page_size: u64,
    ) -> Result<Vec<TransactionRecord>, SyncError> {
        match self.history.get_transactions(0, None, page, page_size, self.wallet).await {
            Ok(transactions) => {
                debug!(page = page, transactions = transactions.len(), "Fetched transactions page");
                self.bus.emit(WalletEvent::TransactionsNextPage {
                    transactions: transactions.clone(),
                    page,
                });
                Ok(transactions)
            }
            Err(err) => {
                self.bus.error(Component::History, "Could not fetch transactions", err.clone());
                Err(err)
            }
        }
    }

    /// Records a sent transaction once its receipt is available and emits it as
    /// [`WalletEvent::TokenTransactionsChanged`].
    ///
    /// # Errors
    ///
    /// [`SyncError::Submission`] if the submission fails. The error is also emitted.
    pub async fn log_transaction<F>(
        &self,
        call: SentCall,
        receipt: F,
    ) -> Result<TransactionRecord, SyncError>
    where
        F: IntoFuture<Output = Result<TransactionReceipt, PendingTransactionError>>,
    {
        match self.history.log_transaction(call, receipt).await {
            Ok(record) => {
                self.bus.emit(WalletEvent::TokenTransactionsChanged {
                    transactions: vec![record.clone()],
                });
                Ok(record)
            }
            Err(err) => {
                self.bus.error(Component::History, "Sent transaction failed", err.clone());
                Err(err)
            }
        }
    }

    /// [`log_transaction`](Self::log_transaction) for a pending transaction handle.
    ///
    /// # Errors
    ///
    /// See [`log_transaction`](Self::log_transaction).
    pub async fn log_pending(
        &self,
        call: SentCall,
        pending: PendingTransactionBuilder<Ethereum>,
    ) -> Result<TransactionRecord, SyncError> {
        self.log_transaction(call, pending.get_receipt()).await
    }

    /// Stops every background loop, including registry subscriptions, and waits for them.
    pub async fn shutdown(&self) {
        self.contracts.stop_watching().await;
        self.history.stop_watching().await;
        self.registry.shutdown().await;
        self.cancel.cancel();

        let forwarders: Vec<_> =
            self.forwarders.lock().unwrap_or_else(PoisonError::into_inner).drain(..).collect();
        for forwarder in forwarders {
            if let Err(err) = forwarder.await {
                error!(error = %err, "Event forwarder terminated abnormally");
            }
        }
        info!(wallet = %self.wallet, "Sync service stopped");
    }
}

async fn forward_contracts(mut stream: ReceiverStream<SyncResult<ContractChange>>, bus: EventBus) {
    while let Some(item) = stream.next().await {
        match item {
            Ok(SyncMessage::Data(change)) => {
                bus.emit(WalletEvent::ContractUpdated { address: change.address });
            }
            Ok(SyncMessage::Notification(_)) => {}
            Err(err) => bus.error(Component::LogPoller, "Could not poll contract events", err),
        }
    }
}

async fn forward_history(mut stream: ReceiverStream<SyncResult<TransactionPage>>, bus: EventBus) {
    while let Some(item) = stream.next().await {
        match item {
            Ok(SyncMessage::Data(page)) => {
                bus.emit(WalletEvent::TokenTransactionsChanged { transactions: page.transactions });
            }
            Ok(SyncMessage::Notification(notification)) => {
                trace!(notification = ?notification, "History scan notification");
            }
            Err(err) => bus.error(Component::History, "Could not sync transactions", err),
        }
    }
}

async fn forward_connection_status(pool: EndpointPool, bus: EventBus, cancel: CancellationToken) {
    let mut status = pool.connection_status();
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let connected = *status.borrow_and_update();
                bus.emit(WalletEvent::ConnectionStatusChanged { connected });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{
        Indexer, IndexerError, NativeTransaction, TokenTransfer, TransactionType, TransferQuery,
    };
    use alloy::{
        primitives::{U256, address},
        transports::TransportErrorKind,
    };
    use async_trait::async_trait;
    use std::time::Duration;

    const WALLET: Address = address!("0x00000000000000000000000000000000000000aa");
    const TOKEN: Address = address!("0x00000000000000000000000000000000000000bb");
    const FACTORY: Address = address!("0x00000000000000000000000000000000000000cc");

    /// Serves one token transfer on page 1 and nothing afterwards.
    #[derive(Debug)]
    struct OnePageIndexer;

    #[async_trait]
    impl Indexer for OnePageIndexer {
        fn name(&self) -> &str {
            "one-page"
        }

        async fn token_transfers(
            &self,
            query: TransferQuery,
        ) -> Result<Vec<TokenTransfer>, IndexerError> {
            if query.page != 1 {
                return Ok(Vec::new());
            }
            Ok(vec![TokenTransfer {
                hash: "0xabc".into(),
                block_number: "10".into(),
                time_stamp: "100".into(),
                from: WALLET.to_string(),
                to: TOKEN.to_string(),
                value: "10".into(),
                gas_price: "2".into(),
                gas_used: "3".into(),
            }])
        }

        async fn native_transactions(
            &self,
            _query: TransferQuery,
        ) -> Result<Vec<NativeTransaction>, IndexerError> {
            Ok(Vec::new())
        }
    }

    async fn service() -> anyhow::Result<SyncService> {
        // nothing listens on port 1
        let pool = EndpointPoolBuilder::new(["http://127.0.0.1:1"])
            .call_timeout(Duration::from_millis(200))
            .build::<Ethereum>()
            .await?;
        let contracts = ChainLogPollerBuilder::new(FACTORY).build(Arc::new(pool.clone()))?;
        let history = TransactionHistoryBuilder::new(TOKEN).indexer(OnePageIndexer).build()?;
        let registry = Arc::new(ContractSubscriptionRegistry::with_polling_interval(
            Arc::new(pool.clone()),
            Duration::from_secs(60),
        ));
        Ok(SyncService::from_parts(WALLET, pool, contracts, history, registry, EventBus::new(16)?))
    }

    #[tokio::test]
    async fn next_page_emits_the_page() -> anyhow::Result<()> {
        let service = service().await?;
        let mut events = service.subscribe();

        let transactions = service.next_page(1, 10).await?;

        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].kind, TransactionType::Transfer);
        let Ok(WalletEvent::TransactionsNextPage { transactions, page }) = events.recv().await
        else {
            panic!("expected the next page");
        };
        assert_eq!(page, 1);
        assert_eq!(transactions[0].tx_hash, "0xabc");
        Ok(())
    }

    #[tokio::test]
    async fn refresh_registers_each_contract_once() -> anyhow::Result<()> {
        let service = service().await?;
        let mut events = service.subscribe();
        let first = address!("0x0000000000000000000000000000000000000001");
        let second = address!("0x0000000000000000000000000000000000000002");

        service.refresh_contracts([first, second])?;
        service.refresh_contracts([first])?;

        assert_eq!(service.registry().len(), 2);
        assert!(matches!(events.recv().await?, WalletEvent::ContractsScanStarted));
        for contract in [first, second] {
            assert!(matches!(
                events.recv().await?,
                WalletEvent::ContractUpdated { address } if address == contract
            ));
        }
        assert!(matches!(events.recv().await?, WalletEvent::ContractsScanFinished));

        service.shutdown().await;
        assert!(service.registry().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn failed_contract_polls_are_emitted_as_registry_errors() -> anyhow::Result<()> {
        let service = service().await?;
        let mut events = service.subscribe();
        let contract = address!("0x0000000000000000000000000000000000000001");

        service.refresh_contracts([contract])?;

        let (component, message) = loop {
            if let WalletEvent::WalletError { component, message, .. } = events.recv().await? {
                break (component, message);
            }
        };
        assert_eq!(component, Component::Registry);
        assert!(message.contains(&contract.to_string()));

        service.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn failed_submission_is_emitted_as_wallet_error() -> anyhow::Result<()> {
        let service = service().await?;
        let mut events = service.subscribe();
        let call = SentCall { from: WALLET, to: Some(TOKEN), value: U256::from(1) };

        let result = service
            .log_transaction(call, async {
                Err::<TransactionReceipt, _>(PendingTransactionError::TransportError(
                    TransportErrorKind::BackendGone.into(),
                ))
            })
            .await;

        assert!(matches!(result, Err(SyncError::Submission(_))));
        let Ok(WalletEvent::WalletError { component, .. }) = events.recv().await else {
            panic!("expected a wallet error");
        };
        assert_eq!(component, Component::History);
        Ok(())
    }

    #[tokio::test]
    async fn start_fails_without_a_reachable_endpoint() -> anyhow::Result<()> {
        let service = service().await?;
        let mut status = service.pool().connection_status();

        assert!(service.start().await.is_err());

        assert!(!service.history().is_watching());
        assert!(!*status.borrow_and_update());
        Ok(())
    }
}
