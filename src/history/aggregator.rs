use std::{
    collections::{HashMap, hash_map::Entry},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use alloy::{
    network::Ethereum,
    primitives::Address,
    providers::{PendingTransactionBuilder, PendingTransactionError},
    rpc::types::TransactionReceipt,
};
use backon::{ExponentialBuilder, Retryable};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::{
    Notification, SyncError,
    abi::AbiRegistry,
    history::{
        Indexer, IndexerError, MappingError, ReceiptSummary, SentCall, TokenSymbols,
        TransactionRecord, TransferQuery, absorb_transaction, map_native_transaction,
        map_sent_transaction, map_token_transfer, merge_transactions,
    },
    types::{SyncMessage, SyncResult, TryStream},
    watch::{DEFAULT_STREAM_BUFFER_CAPACITY, WatchSlot, sleep_or_cancel},
};

/// Default delay between two full page scans.
pub const DEFAULT_HISTORY_POLLING_INTERVAL: Duration = Duration::from_millis(3000);
/// Default number of records requested per page.
pub const DEFAULT_PAGE_SIZE: u64 = 50;
/// Minimum delay before the indexer sequence is retried.
pub const DEFAULT_RETRY_MIN_DELAY: Duration = Duration::from_secs(5);
/// How many times the indexer sequence is retried before giving up.
pub const DEFAULT_RETRY_TIMES: usize = 5;

/// One page of a watch scan.
///
/// Contains the records first seen on this page, plus earlier records that this page
/// completed with more parts. A completed record replaces the one emitted before it under
/// the same hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionPage {
    /// 1-based page number within the scan.
    pub page: u64,
    pub transactions: Vec<TransactionRecord>,
}

/// Builder for a [`TransactionHistory`].
#[derive(Clone, Debug)]
pub struct TransactionHistoryBuilder {
    sources: Vec<Arc<dyn Indexer>>,
    registry: Option<Arc<AbiRegistry>>,
    token_address: Address,
    symbols: TokenSymbols,
    polling_interval: Duration,
    page_size: u64,
    retry_min_delay: Duration,
    retry_times: usize,
    buffer_capacity: usize,
}

impl TransactionHistoryBuilder {
    /// History of native transactions and transfers of the token at `token_address`.
    #[must_use]
    pub fn new(token_address: Address) -> Self {
        Self {
            sources: Vec::new(),
            registry: None,
            token_address,
            symbols: TokenSymbols::default(),
            polling_interval: DEFAULT_HISTORY_POLLING_INTERVAL,
            page_size: DEFAULT_PAGE_SIZE,
            retry_min_delay: DEFAULT_RETRY_MIN_DELAY,
            retry_times: DEFAULT_RETRY_TIMES,
            buffer_capacity: DEFAULT_STREAM_BUFFER_CAPACITY,
        }
    }

    /// Appends an indexer. Indexers are tried in the order they were added.
    #[must_use]
    pub fn indexer(mut self, indexer: impl Indexer + 'static) -> Self {
        self.sources.push(Arc::new(indexer));
        self
    }

    #[must_use]
    pub fn indexers(mut self, indexers: impl IntoIterator<Item = Arc<dyn Indexer>>) -> Self {
        self.sources.extend(indexers);
        self
    }

    /// ABI registry used to classify calls. Defaults to [`AbiRegistry::known`].
    #[must_use]
    pub fn registry(mut self, registry: Arc<AbiRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn symbols(mut self, symbols: TokenSymbols) -> Self {
        self.symbols = symbols;
        self
    }

    #[must_use]
    pub fn polling_interval(mut self, polling_interval: Duration) -> Self {
        self.polling_interval = polling_interval;
        self
    }

    #[must_use]
    pub fn page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size;
        self
    }

    /// Delay before the first retry of the indexer sequence; later retries back off
    /// exponentially.
    #[must_use]
    pub fn retry_min_delay(mut self, retry_min_delay: Duration) -> Self {
        self.retry_min_delay = retry_min_delay;
        self
    }

    #[must_use]
    pub fn retry_times(mut self, retry_times: usize) -> Self {
        self.retry_times = retry_times;
        self
    }

    #[must_use]
    pub fn buffer_capacity(mut self, buffer_capacity: usize) -> Self {
        self.buffer_capacity = buffer_capacity;
        self
    }

    /// # Errors
    ///
    /// * [`SyncError::NoIndexers`] if no indexer was added.
    /// * [`SyncError::InvalidPollingInterval`], [`SyncError::InvalidPageSize`] or
    ///   [`SyncError::InvalidBufferCapacity`] for zero values.
    pub fn build(self) -> Result<TransactionHistory, SyncError> {
        if self.sources.is_empty() {
            return Err(SyncError::NoIndexers);
        }
        if self.polling_interval.is_zero() {
            return Err(SyncError::InvalidPollingInterval);
        }
        if self.page_size == 0 {
            return Err(SyncError::InvalidPageSize);
        }
        if self.buffer_capacity == 0 {
            return Err(SyncError::InvalidBufferCapacity);
        }
        Ok(TransactionHistory {
            inner: Arc::new(HistoryInner {
                sources: self.sources.into(),
                registry: self.registry.unwrap_or_else(|| Arc::new(AbiRegistry::known())),
                token_address: self.token_address,
                symbols: self.symbols,
                polling_interval: self.polling_interval,
                page_size: self.page_size,
                retry_min_delay: self.retry_min_delay,
                retry_times: self.retry_times,
                buffer_capacity: self.buffer_capacity,
            }),
            cursor: Arc::new(AtomicU64::new(0)),
            watch: WatchSlot::default(),
        })
    }
}

/// Wallet transaction history aggregated from one or more indexers.
#[derive(Debug)]
pub struct TransactionHistory {
    inner: Arc<HistoryInner>,
    cursor: Arc<AtomicU64>,
    watch: WatchSlot,
}

#[derive(Debug)]
struct HistoryInner {
    sources: Arc<[Arc<dyn Indexer>]>,
    registry: Arc<AbiRegistry>,
    token_address: Address,
    symbols: TokenSymbols,
    polling_interval: Duration,
    page_size: u64,
    retry_min_delay: Duration,
    retry_times: usize,
    buffer_capacity: usize,
}

impl TransactionHistory {
    #[must_use]
    pub fn registry(&self) -> &Arc<AbiRegistry> {
        &self.inner.registry
    }

    #[must_use]
    pub fn page_size(&self) -> u64 {
        self.inner.page_size
    }

    /// Highest block fully covered by the watch loop.
    #[must_use]
    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::Acquire)
    }

    /// Merged, classified transactions of `address` in `from_block..=to_block`, newest first.
    ///
    /// Token transfers and native transactions are each fetched from the first indexer that
    /// answers. Items that cannot be mapped are skipped.
    ///
    /// # Errors
    ///
    /// [`SyncError::Indexer`] once every indexer failed on every retry.
    pub async fn get_transactions(
        &self,
        from_block: u64,
        to_block: Option<u64>,
        page: u64,
        page_size: u64,
        address: Address,
    ) -> Result<Vec<TransactionRecord>, SyncError> {
        self.inner.get_transactions(from_block, to_block, page, page_size, address).await
    }

    /// Waits for `receipt` and builds the record of the sent transaction.
    ///
    /// # Errors
    ///
    /// [`SyncError::Submission`] if the submission fails before a receipt is available.
    pub async fn log_transaction<F>(
        &self,
        call: SentCall,
        receipt: F,
    ) -> Result<TransactionRecord, SyncError>
    where
        F: IntoFuture<Output = Result<TransactionReceipt, PendingTransactionError>>,
    {
        let receipt = receipt.into_future().await.inspect_err(|err| {
            error!(from = %call.from, error = %err, "Sent transaction failed");
        })?;
        let summary = ReceiptSummary::from(&receipt);
        let record = map_sent_transaction(
            &self.inner.registry,
            &call,
            &summary,
            &self.inner.symbols,
            unix_now(),
        );
        info!(tx_hash = %record.tx_hash, kind = ?record.kind, "Logged sent transaction");
        Ok(record)
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

    /// Starts the background page scan for `address` from `from_block`.
    ///
    /// Every cycle yields [`Notification::ScanStarted`], one [`TransactionPage`] per page with
    /// new or completed records, and [`Notification::ScanFinished`] once a page comes back
    /// empty. A failed cycle yields its error instead and the next cycle rescans from the same
    /// cursor.
    ///
    /// # Errors
    ///
    /// [`SyncError::AlreadyStarted`] if a watch loop is running.
    pub fn start_watching(
        &self,
        address: Address,
        from_block: u64,
    ) -> Result<ReceiverStream<SyncResult<TransactionPage>>, SyncError> {
        let (sender, receiver) = mpsc::channel(self.inner.buffer_capacity);
        let inner = Arc::clone(&self.inner);
        let cursor = Arc::clone(&self.cursor);

        self.watch.start(move |cancel| {
            cursor.store(from_block, Ordering::Release);
            info!(
                address = %address,
                from_block = from_block,
                "Starting transaction history watch"
            );
            inner.run(address, cursor, sender, cancel)
        })?;

        Ok(ReceiverStream::new(receiver))
    }

    /// Asks the watch loop to exit between pages and waits for it.
    pub async fn stop_watching(&self) {
        self.watch.stop().await;
        debug!(cursor = self.cursor(), "Transaction history watch stopped");
    }

    #[must_use]
    pub fn is_watching(&self) -> bool {
        self.watch.is_running()
    }
}

enum ScanOutcome {
    Finished,
    Failed,
    Cancelled,
    Closed,
}

impl HistoryInner {
    async fn get_transactions(
        &self,
        from_block: u64,
        to_block: Option<u64>,
        page: u64,
        page_size: u64,
        address: Address,
    ) -> Result<Vec<TransactionRecord>, SyncError> {
        let query = TransferQuery {
            from_block,
            to_block,
            page,
            page_size,
            address,
            token_address: self.token_address,
        };

        let tokens = self
            .invoke("tokentx", |indexer| {
                let query = query.clone();
                async move { indexer.token_transfers(query).await }
            })
            .await?;
        let natives = self
            .invoke("txlist", |indexer| {
                let query = query.clone();
                async move { indexer.native_transactions(query).await }
            })
            .await?;

        let token_records = tokens
            .iter()
            .filter_map(|tx| mapped(&tx.hash, map_token_transfer(tx, &self.symbols.token)));
        let native_records = natives.iter().filter_map(|tx| {
            mapped(&tx.hash, map_native_transaction(&self.registry, tx, &self.symbols.native))
        });

        Ok(merge_transactions(token_records.chain(native_records)))
    }

    /// Tries every indexer in order, and retries the whole sequence with exponential backoff
    /// if all of them fail. Always starts from the first indexer.
    async fn invoke<T, F, Fut>(&self, action: &'static str, call: F) -> Result<T, IndexerError>
    where
        F: Fn(Arc<dyn Indexer>) -> Fut,
        Fut: Future<Output = Result<T, IndexerError>>,
    {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.retry_min_delay)
            .with_max_times(self.retry_times);

        (|| async {
            let mut last_error = None;
            for indexer in self.sources.iter() {
                match call(Arc::clone(indexer)).await {
                    Ok(value) => return Ok(value),
                    Err(err) => {
                        warn!(
                            indexer = indexer.name(),
                            action = action,
                            error = %err,
                            "Indexer failed, trying next"
                        );
                        last_error = Some(err);
                    }
                }
            }
            let last = last_error
                .unwrap_or_else(|| IndexerError::Decode("no indexers configured".into()));
            Err(IndexerError::AllSourcesFailed(Box::new(last)))
        })
        .retry(backoff)
        .notify(|err: &IndexerError, delay: Duration| {
            warn!(
                action = action,
                delay_ms = delay.as_millis(),
                error = %err,
                "All indexers failed, retrying"
            );
        })
        .sleep(tokio::time::sleep)
        .await
    }

    async fn run(
        self: Arc<Self>,
        address: Address,
        cursor: Arc<AtomicU64>,
        sender: mpsc::Sender<SyncResult<TransactionPage>>,
        cancel: CancellationToken,
    ) {
        // merged records already emitted at or above the cursor, by hash
        let mut seen: HashMap<String, TransactionRecord> = HashMap::new();

        while !cancel.is_cancelled() {
            if !sender.try_stream(Notification::ScanStarted).await {
                return;
            }
            match self.scan(address, &cursor, &mut seen, &sender, &cancel).await {
                ScanOutcome::Finished => {
                    if !sender.try_stream(Notification::ScanFinished).await {
                        return;
                    }
                }
                ScanOutcome::Failed => {}
                ScanOutcome::Cancelled | ScanOutcome::Closed => return,
            }
            if !sleep_or_cancel(&cancel, self.polling_interval).await {
                return;
            }
        }
    }

    /// Pages through `cursor..=latest` until an empty page. The cursor is advanced only after
    /// the last page; a failure or cancellation leaves it untouched.
    async fn scan(
        &self,
        address: Address,
        cursor: &AtomicU64,
        seen: &mut HashMap<String, TransactionRecord>,
        sender: &mpsc::Sender<SyncResult<TransactionPage>>,
        cancel: &CancellationToken,
    ) -> ScanOutcome {
        let from_block = cursor.load(Ordering::Acquire);
        let mut max_block = from_block;
        let mut page = 1;

        loop {
            let records =
                match self.get_transactions(from_block, None, page, self.page_size, address).await {
                    Ok(records) => records,
                    Err(err) => {
                        error!(
                            error = %err,
                            from_block = from_block,
                            page = page,
                            "Transaction scan failed"
                        );
                        return if sender.try_stream(err).await {
                            ScanOutcome::Failed
                        } else {
                            ScanOutcome::Closed
                        };
                    }
                };
            if records.is_empty() {
                break;
            }

            let mut transactions = Vec::new();
            for tx in records {
                max_block = max_block.max(tx.block_number);
                // token and native halves of one transaction may arrive on different pages
                match seen.entry(tx.tx_hash.clone()) {
                    Entry::Vacant(entry) => transactions.push(entry.insert(tx).clone()),
                    Entry::Occupied(mut entry) => {
                        if absorb_transaction(entry.get_mut(), tx) {
                            transactions.push(entry.get().clone());
                        }
                    }
                }
            }
            debug!(page = page, emitted = transactions.len(), "Fetched transaction page");

            if !transactions.is_empty()
                && !sender
                    .try_stream(SyncMessage::Data(TransactionPage { page, transactions }))
                    .await
            {
                return ScanOutcome::Closed;
            }
            if cancel.is_cancelled() {
                return ScanOutcome::Cancelled;
            }
            page += 1;
        }

        let cursor = cursor.fetch_max(max_block, Ordering::AcqRel).max(max_block);
        seen.retain(|_, tx| tx.block_number >= cursor);
        trace!(cursor = cursor, remembered = seen.len(), "Transaction scan finished");
        ScanOutcome::Finished
    }
}

fn mapped(
    hash: &str,
    result: Result<TransactionRecord, MappingError>,
) -> Option<TransactionRecord> {
    result
        .inspect_err(|err| {
            warn!(tx_hash = hash, error = %err, "Skipping unmappable indexer record");
        })
        .ok()
}

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |elapsed| elapsed.as_secs())
}
