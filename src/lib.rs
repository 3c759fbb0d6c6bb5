//! Chain connectivity and event synchronization for EVM wallets.
//!
//! The crate keeps a wallet backend in sync with an Ethereum-compatible chain using only
//! request/response polling:
//!
//! * [`endpoint_pool`]: an [`EndpointPool`] of RPC endpoints that survives node failures and
//!   rate limiting by rotating between endpoints with a fixed backoff table.
//! * [`log_poller`]: a [`ChainLogPoller`] that polls logs from a cursor block and streams the
//!   contracts they touch.
//! * [`history`]: a [`TransactionHistory`] that merges token transfers and native transactions
//!   from Etherscan-compatible indexers into classified [`TransactionRecord`]s.
//! * [`registry`]: a [`ContractSubscriptionRegistry`] holding at most one log subscription per
//!   contract.
//!
//! [`service::SyncService`] wires these together from a [`config::SyncConfig`] and publishes
//! [`events::WalletEvent`]s on an [`events::EventBus`].
//!
//! # Stream items
//!
//! Watch loops yield [`SyncResult`] items. Successful items are [`SyncMessage`] values, which
//! wrap either data or a [`Notification`]. Errors are yielded per cycle; the loop keeps running
//! and the next cycle resumes from the same cursor.
//!
//! # Cursors and duplicates
//!
//! Cursors resume at the highest processed block, inclusive. Items already emitted at that
//! block are remembered and not emitted again by the next cycle. Consumers should still treat
//! notifications as triggers to re-fetch state rather than as the state itself.
//!
//! # Reorgs
//!
//! Chain reorganizations are not detected. Ranges behind a cursor are never re-queried.
//!
//! # Backpressure
//!
//! Watch streams are bounded channels; a slow consumer slows the producing loop down. Dropping
//! a stream ends its loop. The [`events::EventBus`] is a broadcast channel, lagging subscribers
//! skip older events.

#[macro_use]
mod logging;

pub mod abi;
pub mod config;
pub mod endpoint_pool;
pub mod events;
pub mod history;
pub mod log_poller;
pub mod registry;
pub mod service;

mod error;
mod types;
mod watch;

pub use error::SyncError;
pub use types::{Notification, SyncMessage, SyncResult};
pub use watch::DEFAULT_STREAM_BUFFER_CAPACITY;

pub use endpoint_pool::{EndpointPool, EndpointPoolBuilder};
pub use history::{
    TransactionHistory, TransactionHistoryBuilder, TransactionRecord, TransactionType,
};
pub use log_poller::{ChainLogPoller, ChainLogPollerBuilder, ContractChange};
pub use registry::ContractSubscriptionRegistry;
