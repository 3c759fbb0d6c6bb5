//! At most one log subscription per contract.
//!
//! [`ContractSubscriptionRegistry`] watches every registered contract with its own
//! [`ChainLogPoller`] and calls a single update callback with the contract address whenever
//! new logs show up. Failed polls go to a separate error callback, or to the log when none is
//! installed. Registering an address twice is a no-op.
//!
//! The registry is meant to be constructed once and passed to whoever needs it. A
//! process-wide instance is available through [`ContractSubscriptionRegistry::create`] and
//! [`ContractSubscriptionRegistry::get_instance`] for callers that cannot be handed one.

use std::{
    fmt,
    sync::{Arc, OnceLock, PoisonError, RwLock},
    time::Duration,
};

use alloy::primitives::Address;
use dashmap::{DashMap, mapref::entry::Entry};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;

use crate::{
    SyncError, SyncMessage,
    endpoint_pool::EndpointPool,
    log_poller::{
        AddressSource, ChainLogPoller, ChainLogPollerBuilder, DEFAULT_POLLING_INTERVAL, LogSource,
    },
};

/// Callback invoked with the address of a contract that emitted new logs.
pub type UpdateCallback = Arc<dyn Fn(Address) + Send + Sync>;

/// Callback invoked with the address of a contract whose poll failed. The subscription keeps
/// running and retries from the same cursor.
pub type ErrorCallback = Arc<dyn Fn(Address, SyncError) + Send + Sync>;

static INSTANCE: OnceLock<Arc<ContractSubscriptionRegistry>> = OnceLock::new();

struct Subscription<S: LogSource> {
    poller: ChainLogPoller<S>,
    forwarder: JoinHandle<()>,
}

pub struct ContractSubscriptionRegistry<S: LogSource = EndpointPool> {
    source: Arc<S>,
    polling_interval: Duration,
    subscriptions: DashMap<Address, Subscription<S>>,
    on_update: Arc<RwLock<Option<UpdateCallback>>>,
    on_error: Arc<RwLock<Option<ErrorCallback>>>,
}

impl<S: LogSource> fmt::Debug for ContractSubscriptionRegistry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContractSubscriptionRegistry")
            .field("polling_interval", &self.polling_interval)
            .field("subscriptions", &self.subscriptions.len())
            .finish_non_exhaustive()
    }
}

impl<S: LogSource> ContractSubscriptionRegistry<S> {
    #[must_use]
    pub fn new(source: Arc<S>) -> Self {
        Self::with_polling_interval(source, DEFAULT_POLLING_INTERVAL)
    }

    #[must_use]
    pub fn with_polling_interval(source: Arc<S>, polling_interval: Duration) -> Self {
        Self {
            source,
            polling_interval,
            subscriptions: DashMap::new(),
            on_update: Arc::new(RwLock::new(None)),
            on_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Installs the callback for every subscription, replacing the previous one.
    pub fn set_on_update(&self, on_update: impl Fn(Address) + Send + Sync + 'static) {
        *self.on_update.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(on_update));
    }

    /// Installs the poll error callback for every subscription, replacing the previous one.
    pub fn set_on_error(&self, on_error: impl Fn(Address, SyncError) + Send + Sync + 'static) {
        *self.on_error.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(on_error));
    }

    /// Subscribes to logs of `id` from `from_block` unless it is already subscribed.
    /// Returns whether a new subscription was created.
    ///
    /// # Errors
    ///
    /// [`SyncError::InvalidPollingInterval`] if the registry was built with a zero interval.
    pub fn add_contract(&self, id: Address, from_block: u64) -> Result<bool, SyncError> {
        // the entry guard is held until insert, no await in between
        let Entry::Vacant(entry) = self.subscriptions.entry(id) else {
            trace!(contract = %id, "Contract already subscribed");
            return Ok(false);
        };

        let poller = ChainLogPollerBuilder::new(id)
            .all_events()
            .address_source(AddressSource::Emitter)
            .polling_interval(self.polling_interval)
            .build(Arc::clone(&self.source))?;
        let mut stream = poller.start_watching(from_block)?;
        let on_update = Arc::clone(&self.on_update);
        let on_error = Arc::clone(&self.on_error);

        let forwarder = tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(SyncMessage::Data(change)) => {
                        debug!(contract = %change.address, "Contract updated");
                        let callback =
                            on_update.read().unwrap_or_else(PoisonError::into_inner).clone();
                        if let Some(callback) = callback {
                            callback(change.address);
                        }
                    }
                    Ok(SyncMessage::Notification(_)) => {}
                    Err(err) => {
                        let callback =
                            on_error.read().unwrap_or_else(PoisonError::into_inner).clone();
                        match callback {
                            Some(callback) => callback(id, err),
                            None => warn!(
                                contract = %id,
                                error = %err,
                                "Contract subscription poll failed"
                            ),
                        }
                    }
                }
            }
        });

        entry.insert(Subscription { poller, forwarder });
        debug!(contract = %id, from_block = from_block, "Subscribed to contract events");
        Ok(true)
    }

    #[must_use]
    pub fn contains(&self, id: &Address) -> bool {
        self.subscriptions.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Stops every subscription and waits for their loops to return.
    pub async fn shutdown(&self) {
        let ids: Vec<Address> = self.subscriptions.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            let Some((_, subscription)) = self.subscriptions.remove(&id) else {
                continue;
            };
            subscription.poller.stop_watching().await;
            if let Err(err) = subscription.forwarder.await {
                error!(
                    contract = %id,
                    error = %err,
                    "Subscription forwarder terminated abnormally"
                );
            }
        }
        info!("Contract subscriptions stopped");
    }
}

impl ContractSubscriptionRegistry<EndpointPool> {
    /// Creates the process-wide registry, or returns the existing one.
    pub fn create(pool: EndpointPool, polling_interval: Duration) -> Arc<Self> {
        let registry = INSTANCE.get_or_init(|| {
            Arc::new(Self::with_polling_interval(Arc::new(pool), polling_interval))
        });
        Arc::clone(registry)
    }

    /// The process-wide registry.
    ///
    /// # Errors
    ///
    /// [`SyncError::RegistryNotCreated`] if [`create`](Self::create) was not called yet.
    pub fn get_instance() -> Result<Arc<Self>, SyncError> {
        INSTANCE.get().cloned().ok_or(SyncError::RegistryNotCreated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::{
        primitives::{B256, LogData, address},
        rpc::types::{Filter, Log},
    };
    use async_trait::async_trait;
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };
    use tokio::sync::mpsc;

    const C1: Address = address!("0x00000000000000000000000000000000000000c1");
    const C2: Address = address!("0x00000000000000000000000000000000000000c2");

    /// Returns one log per watched address on its first poll, nothing afterwards.
    #[derive(Default)]
    struct OneShotSource {
        served: Mutex<Vec<Address>>,
        polls: AtomicUsize,
    }

    #[async_trait]
    impl LogSource for OneShotSource {
        async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, SyncError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            let Some(address) = filter.address.iter().next().copied() else {
                return Ok(Vec::new());
            };
            let mut served = self.served.lock().unwrap();
            if served.contains(&address) {
                return Ok(Vec::new());
            }
            served.push(address);
            Ok(vec![Log {
                inner: alloy::primitives::Log {
                    address,
                    data: LogData::new_unchecked(vec![B256::repeat_byte(1)], Default::default()),
                },
                block_number: Some(7),
                ..Default::default()
            }])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_registration_is_a_no_op() -> anyhow::Result<()> {
        let registry = ContractSubscriptionRegistry::new(Arc::new(OneShotSource::default()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.set_on_update(move |id| {
            let _ = tx.send(id);
        });

        assert!(registry.add_contract(C1, 0)?);
        assert!(!registry.add_contract(C1, 0)?);
        assert!(registry.add_contract(C2, 0)?);
        assert_eq!(registry.len(), 2);

        let mut updated = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        updated.sort();
        assert_eq!(updated, vec![C1, C2]);

        registry.shutdown().await;
        assert!(registry.is_empty());
        // C1 was only subscribed once, so it was only reported once
        assert!(rx.try_recv().is_err());
        Ok(())
    }

    /// Fails every poll.
    struct FailingSource;

    #[async_trait]
    impl LogSource for FailingSource {
        async fn logs(&self, _filter: &Filter) -> Result<Vec<Log>, SyncError> {
            Err(SyncError::Timeout)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn poll_errors_reach_the_error_callback() -> anyhow::Result<()> {
        let registry = ContractSubscriptionRegistry::new(Arc::new(FailingSource));
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.set_on_error(move |id, err| {
            let _ = tx.send((id, err));
        });

        assert!(registry.add_contract(C1, 0)?);

        let (id, err) = rx.recv().await.unwrap();
        assert_eq!(id, C1);
        assert!(matches!(err, SyncError::Timeout));
        // the subscription survives and polls again
        let (id, _) = rx.recv().await.unwrap();
        assert_eq!(id, C1);
        assert!(registry.contains(&C1));

        registry.shutdown().await;
        Ok(())
    }

    #[test]
    fn zero_interval_is_rejected() {
        let source = Arc::new(OneShotSource::default());
        let registry = ContractSubscriptionRegistry::with_polling_interval(source, Duration::ZERO);
        assert!(matches!(registry.add_contract(C1, 0), Err(SyncError::InvalidPollingInterval)));
        assert!(!registry.contains(&C1));
    }
}
