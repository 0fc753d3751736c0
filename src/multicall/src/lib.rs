//! Batched read-only contract calls over the Multicall3 `aggregate` function.
//!
//! Calls are described by a target, a compound signature such as
//! `balanceOf(address)(uint256)` and their arguments. A [`MulticallExecutor`]
//! groups calls submitted from many threads into batches, executes each batch
//! as one aggregate call through a pool of rate limited endpoints and hands
//! every caller a [`CallFuture`] resolving to its own decoded result.

pub mod aggregate;
pub mod call;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod executor;
pub mod pool;
pub mod signature;
pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use aggregate::{AggregateResult, CallResult, Multicall, MULTICALL3_ADDRESS};
pub use call::Call;
pub use config::ExecutorConfig;
pub use endpoint::Endpoint;
pub use error::{MulticallError, Result};
pub use ethers_core::abi::{ParamType, Token};
pub use ethers_core::types::{Address, Bytes, U256};
pub use executor::{CallFuture, MulticallExecutor};
pub use pool::{EndpointHandle, EndpointPool};
pub use signature::Signature;
pub use transport::Transport;
