//! Typed notifications for wallet consumers.

use std::fmt;

use alloy::primitives::Address;
use tokio::sync::broadcast;

use crate::{SyncError, history::TransactionRecord};

/// Default capacity of the [`EventBus`] channel.
pub const DEFAULT_EVENT_BUS_CAPACITY: usize = 128;

/// Component that reported a [`WalletEvent::WalletError`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Component {
    EndpointPool,
    LogPoller,
    History,
    Registry,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Component::EndpointPool => "endpoint-pool",
            Component::LogPoller => "log-poller",
            Component::History => "history",
            Component::Registry => "registry",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug)]
pub enum WalletEvent {
    ContractsScanStarted,
    ContractsScanFinished,
    /// The contract's state may have changed and should be re-fetched.
    ContractUpdated { address: Address },
    TokenTransactionsChanged { transactions: Vec<TransactionRecord> },
    TransactionsNextPage { transactions: Vec<TransactionRecord>, page: u64 },
    WalletError { inner: SyncError, message: String, component: Component },
    ConnectionStatusChanged { connected: bool },
}

/// Broadcast channel fanning [`WalletEvent`]s out to every subscriber.
///
/// Events emitted while nobody is subscribed are dropped. Slow subscribers observe
/// `RecvError::Lagged` and continue with newer events.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<WalletEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(DEFAULT_EVENT_BUS_CAPACITY);
        Self { sender }
    }
}

impl EventBus {
    /// # Errors
    ///
    /// [`SyncError::InvalidBufferCapacity`] if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self, SyncError> {
        if capacity == 0 {
            return Err(SyncError::InvalidBufferCapacity);
        }
        let (sender, _) = broadcast::channel(capacity);
        Ok(Self { sender })
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: WalletEvent) {
        if self.sender.send(event).is_err() {
            trace!("No event subscribers");
        }
    }

    /// Emits [`WalletEvent::WalletError`].
    pub fn error(&self, component: Component, message: impl Into<String>, inner: SyncError) {
        let message = message.into();
        warn!(component = %component, error = %inner, "{}", message);
        self.emit(WalletEvent::WalletError { inner, message, component });
    }
}
