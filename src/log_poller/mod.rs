//! Polling-based detection of contract state changes.
//!
//! [`ChainLogPoller`] repeatedly queries `eth_getLogs` for an address and topic set from its
//! cursor to `latest`, and streams a [`ContractChange`] per distinct contract touched in a
//! batch. No push subscription is required.
//!
//! Chain reorganizations are not detected: ranges behind the cursor are never re-queried.

mod builder;
mod poller;
mod source;

pub use builder::{ChainLogPollerBuilder, DEFAULT_POLLING_INTERVAL};
pub use poller::{AddressSource, ChainLogPoller, ContractChange};
pub use source::LogSource;
