use std::{
    sync::{Arc, atomic::AtomicU64},
    time::Duration,
};

use alloy::primitives::{Address, B256};

use crate::{
    SyncError,
    abi,
    log_poller::{AddressSource, ChainLogPoller, LogSource, poller::PollerConfig},
    watch::{DEFAULT_STREAM_BUFFER_CAPACITY, WatchSlot},
};

/// Default delay between two poll cycles.
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_millis(3000);

/// Builder for a [`ChainLogPoller`].
#[derive(Clone, Debug)]
pub struct ChainLogPollerBuilder {
    address: Address,
    topics: Vec<B256>,
    polling_interval: Duration,
    buffer_capacity: usize,
    address_source: AddressSource,
}

impl ChainLogPollerBuilder {
    /// Watches the contract lifecycle events (see [`abi::contract_event_topics`]) emitted by
    /// `address` and reports the contract addresses they carry.
    #[must_use]
    pub fn new(address: Address) -> Self {
        Self {
            address,
            topics: abi::contract_event_topics(),
            polling_interval: DEFAULT_POLLING_INTERVAL,
            buffer_capacity: DEFAULT_STREAM_BUFFER_CAPACITY,
            address_source: AddressSource::IndexedTopic,
        }
    }

    /// Replaces the `topic0` set. An empty set matches every event.
    #[must_use]
    pub fn topics(mut self, topics: impl IntoIterator<Item = B256>) -> Self {
        self.topics = topics.into_iter().collect();
        self
    }

    /// Matches every event emitted by the watched address.
    #[must_use]
    pub fn all_events(self) -> Self {
        self.topics([])
    }

    #[must_use]
    pub fn address_source(mut self, address_source: AddressSource) -> Self {
        self.address_source = address_source;
        self
    }

    /// Must be greater than 0.
    #[must_use]
    pub fn polling_interval(mut self, polling_interval: Duration) -> Self {
        self.polling_interval = polling_interval;
        self
    }

    /// Sets the stream buffer capacity.
    ///
    /// Controls the maximum number of messages buffered in the stream before the poller
    /// waits for the consumer. Must be greater than 0.
    #[must_use]
    pub fn buffer_capacity(mut self, buffer_capacity: usize) -> Self {
        self.buffer_capacity = buffer_capacity;
        self
    }

    /// # Errors
    ///
    /// * [`SyncError::InvalidPollingInterval`] for a zero interval.
    /// * [`SyncError::InvalidBufferCapacity`] for a zero buffer capacity.
    pub fn build<S: LogSource>(self, source: Arc<S>) -> Result<ChainLogPoller<S>, SyncError> {
        if self.polling_interval.is_zero() {
            return Err(SyncError::InvalidPollingInterval);
        }
        if self.buffer_capacity == 0 {
            return Err(SyncError::InvalidBufferCapacity);
        }
        Ok(ChainLogPoller {
            source,
            config: Arc::new(PollerConfig {
                address: self.address,
                topics: self.topics,
                polling_interval: self.polling_interval,
                buffer_capacity: self.buffer_capacity,
                address_source: self.address_source,
            }),
            cursor: Arc::new(AtomicU64::new(0)),
            watch: WatchSlot::default(),
        })
    }
}
