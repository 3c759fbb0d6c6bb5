//! Multi-endpoint RPC client with stateful round-robin failover.
//!
//! [`EndpointPool`] owns an ordered list of immutable [`Endpoint`]s and routes every call
//! through [`EndpointPool::execute`]:
//! * each attempt is bounded by a per-call timeout
//! * retryable failures (timeouts, transport faults, rate-limit signatures, see [`classify`])
//!   rotate to the next endpoint after a delay from [`ROTATION_DELAYS`]
//! * a logical call makes at most `2 * endpoints` attempts before the last error is returned
//! * non-retryable failures are returned immediately
//!
//! The rotation is shared: the next call starts from the endpoint that served the previous
//! successful one.
//!
//! # Examples
//!
//! ```rust,no_run
//! use alloy::network::Ethereum;
//! use std::time::Duration;
//! use wallet_chain_sync::endpoint_pool::EndpointPoolBuilder;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = EndpointPoolBuilder::new(["https://rpc-1.example", "https://rpc-2.example"])
//!     .call_timeout(Duration::from_secs(10))
//!     .build::<Ethereum>()
//!     .await?;
//!
//! let latest = pool.get_block_number().await?;
//! println!("latest block: {latest}");
//! # Ok(()) }
//! ```

mod backoff;
mod builder;
pub mod classify;
mod error;
mod pool;

pub use backoff::{ROTATION_DELAYS, RotationBackoff, RotationBackoffBuilder};
pub use builder::{DEFAULT_CALL_TIMEOUT, EndpointPoolBuilder};
pub use error::Error;
pub use pool::{Endpoint, EndpointPool};
