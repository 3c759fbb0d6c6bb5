//! Wallet transaction history from Etherscan-compatible indexers.
//!
//! [`TransactionHistory`] queries token transfers and native transactions for a wallet,
//! maps them to [`TransactionRecord`]s (classifying contract calls through the
//! [`AbiRegistry`](crate::abi::AbiRegistry)), merges records sharing a hash and returns them
//! newest first. It can also page through new history in the background, see
//! [`TransactionHistory::start_watching`].
//!
//! Indexers are tried in order for every query; if all of them fail, the sequence is retried
//! with exponential backoff before the error is surfaced.

mod aggregator;
mod indexer;
mod mapper;
mod record;

pub use aggregator::{
    DEFAULT_HISTORY_POLLING_INTERVAL, DEFAULT_PAGE_SIZE, DEFAULT_RETRY_MIN_DELAY,
    DEFAULT_RETRY_TIMES, TransactionHistory, TransactionHistoryBuilder, TransactionPage,
};
pub use indexer::{
    DEFAULT_REQUEST_TIMEOUT, EtherscanCompatibleApi, Indexer, IndexerError, IndexerKind,
    NO_TRANSACTIONS_FOUND, NativeTransaction, TokenTransfer, TransferQuery, default_indexers,
};
pub use mapper::{
    MappingError, ReceiptSummary, SentCall, TokenSymbols, absorb_transaction,
    map_native_transaction, map_sent_transaction, map_token_transfer, merge_transactions,
};
pub use record::{TransactionRecord, TransactionType, Transfer};
