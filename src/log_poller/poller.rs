use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use alloy::{
    eips::BlockNumberOrTag,
    primitives::{Address, B256},
    rpc::types::{Filter, Log},
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::{
    SyncError, abi,
    endpoint_pool::EndpointPool,
    log_poller::LogSource,
    types::{SyncMessage, SyncResult, TryStream},
    watch::{WatchSlot, sleep_or_cancel},
};

/// A contract whose state may have changed. Consumers re-fetch the contract state.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ContractChange {
    pub address: Address,
}

/// How the changed contract is derived from a log.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum AddressSource {
    /// The contract address indexed in the lifecycle event's first topic.
    #[default]
    IndexedTopic,
    /// The address that emitted the log.
    Emitter,
}

/// `(transaction hash, log index)`
type LogKey = (B256, u64);

#[derive(Debug)]
pub(crate) struct PollerConfig {
    pub(crate) address: Address,
    pub(crate) topics: Vec<B256>,
    pub(crate) polling_interval: Duration,
    pub(crate) buffer_capacity: usize,
    pub(crate) address_source: AddressSource,
}

/// Polls an address for logs and streams the contracts they touch.
///
/// The poller is `Idle` until [`start_watching`](Self::start_watching) and returns to `Idle`
/// once [`stop_watching`](Self::stop_watching) has awaited the loop. Every cycle queries
/// `cursor..=latest`; the cursor only moves forward, and only after a successful query.
#[derive(Debug)]
pub struct ChainLogPoller<S: LogSource = EndpointPool> {
    pub(crate) source: Arc<S>,
    pub(crate) config: Arc<PollerConfig>,
    pub(crate) cursor: Arc<AtomicU64>,
    pub(crate) watch: WatchSlot,
}

impl<S: LogSource> ChainLogPoller<S> {
    /// Highest block known to be fully processed.
    #[must_use]
    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_watching(&self) -> bool {
        self.watch.is_running()
    }

    /// Starts the poll loop at `from_block`.
    ///
    /// Query failures are yielded as `Err` items; the loop keeps polling from the same cursor.
    /// Dropping the stream ends the loop.
    ///
    /// # Errors
    ///
    /// [`SyncError::AlreadyStarted`] if a loop is running. The running loop is not affected.
    pub fn start_watching(
        &self,
        from_block: u64,
    ) -> Result<ReceiverStream<SyncResult<ContractChange>>, SyncError> {
        let (sender, receiver) = mpsc::channel(self.config.buffer_capacity);
        let source = Arc::clone(&self.source);
        let config = Arc::clone(&self.config);
        let cursor = Arc::clone(&self.cursor);

        self.watch.start(move |cancel| {
            cursor.store(from_block, Ordering::Release);
            info!(address = %config.address, from_block = from_block, "Starting log poller");
            run(source, config, cursor, sender, cancel)
        })?;

        Ok(ReceiverStream::new(receiver))
    }

    /// Asks the loop to exit after its current cycle and waits for it.
    pub async fn stop_watching(&self) {
        self.watch.stop().await;
        debug!(address = %self.config.address, cursor = self.cursor(), "Log poller stopped");
    }
}

async fn run<S: LogSource>(
    source: Arc<S>,
    config: Arc<PollerConfig>,
    cursor: Arc<AtomicU64>,
    sender: mpsc::Sender<SyncResult<ContractChange>>,
    cancel: CancellationToken,
) {
    let mut seen = HashSet::new();

    while !cancel.is_cancelled() {
        let from_block = cursor.load(Ordering::Acquire);
        trace!(address = %config.address, from_block = from_block, "Polling logs");

        match source.logs(&config.filter(from_block)).await {
            Ok(logs) => {
                let changes = config.process(&logs, &cursor, &mut seen);
                debug!(
                    logs = logs.len(),
                    changes = changes.len(),
                    cursor = cursor.load(Ordering::Acquire),
                    "Poll cycle finished"
                );
                for change in changes {
                    if !sender.try_stream(SyncMessage::Data(change)).await {
                        return;
                    }
                }
            }
            Err(err) => {
                error!(error = %err, from_block = from_block, "Log poll failed");
                if !sender.try_stream(err).await {
                    return;
                }
            }
        }

        if !sleep_or_cancel(&cancel, config.polling_interval).await {
            break;
        }
    }
}

impl PollerConfig {
    fn filter(&self, from_block: u64) -> Filter {
        let filter = Filter::new()
            .address(self.address)
            .from_block(from_block)
            .to_block(BlockNumberOrTag::Latest);
        if self.topics.is_empty() { filter } else { filter.event_signature(self.topics.clone()) }
    }

    /// Advances `cursor` past `logs` and returns each touched contract once.
    ///
    /// Logs at the cursor block that were handled by an earlier cycle (tracked in `seen`)
    /// are skipped.
    fn process(
        &self,
        logs: &[Log],
        cursor: &AtomicU64,
        seen: &mut HashSet<LogKey>,
    ) -> Vec<ContractChange> {
        let current = cursor.load(Ordering::Acquire);
        let mut max_block = current;
        let mut fresh = Vec::new();
        let mut touched = HashSet::new();
        let mut changes = Vec::new();

        for log in logs {
            let key = log.transaction_hash.zip(log.log_index);
            if let (Some(key), Some(block)) = (key, log.block_number) {
                if block == current && seen.contains(&key) {
                    trace!(block = block, "Skipping log processed by a previous cycle");
                    continue;
                }
                fresh.push((block, key));
            }
            if let Some(block) = log.block_number {
                max_block = max_block.max(block);
            }

            let Some(address) = self.changed_address(log) else {
                continue;
            };
            if touched.insert(address) {
                changes.push(ContractChange { address });
            }
        }

        if max_block > current {
            seen.clear();
        }
        seen.extend(fresh.into_iter().filter(|(block, _)| *block == max_block).map(|(_, key)| key));
        cursor.fetch_max(max_block, Ordering::AcqRel);

        changes
    }

    fn changed_address(&self, log: &Log) -> Option<Address> {
        match self.address_source {
            AddressSource::Emitter => Some(log.address()),
            AddressSource::IndexedTopic => match abi::decode_contract_address(log.data()) {
                Ok(address) => Some(address),
                Err(err) => {
                    warn!(
                        tx_hash = ?log.transaction_hash,
                        block = ?log.block_number,
                        error = %err,
                        "Skipping undecodable log"
                    );
                    None
                }
            },
        }
    }
}
