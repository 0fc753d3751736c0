use std::sync::Arc;

use anyhow::Context;
use ethereum_json_rpc_client::{Client, EthJsonRpcClient};
use ethers_core::types::{Address, BlockNumber, Bytes};

/// Performs one read-only remote call and returns the raw return data.
///
/// Implementations block the calling thread; the executor only ever calls
/// them from its worker pool.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    fn call(&self, target: Address, data: Bytes) -> anyhow::Result<Bytes>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn call(&self, target: Address, data: Bytes) -> anyhow::Result<Bytes> {
        (**self).call(target, data)
    }
}

impl<C: Client> Transport for EthJsonRpcClient<C> {
    fn call(&self, target: Address, data: Bytes) -> anyhow::Result<Bytes> {
        self.eth_call(target, data, BlockNumber::Latest)
            .with_context(|| format!("eth_call to {target:?} failed"))
    }
}
