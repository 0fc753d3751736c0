use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ethers_core::abi::Token;

use super::batch::BatchShared;
use crate::error::{MulticallError, Result};

/// Handle on the result of one submitted call.
///
/// Every future of a batch waits on the same completion signal. Once the
/// batch is settled, [`get`](Self::get) always returns the same answer: the
/// decoded value of this call, or the error shared by the whole batch.
#[derive(Clone)]
pub struct CallFuture {
    batch: Arc<BatchShared>,
    index: usize,
}

impl CallFuture {
    pub(crate) fn new(batch: Arc<BatchShared>, index: usize) -> Self {
        Self { batch, index }
    }

    /// Sequence number of the call inside its batch.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn batch_id(&self) -> u64 {
        self.batch.id()
    }

    pub(crate) fn batch_phase(&self) -> &'static str {
        self.batch.phase()
    }

    /// Whether `get` would return without blocking.
    pub fn is_ready(&self) -> bool {
        self.batch.is_settled()
    }

    /// Blocks until the batch is settled and returns this call's result.
    pub fn get(&self) -> Result<Token> {
        self.batch.wait().result_at(self.index)
    }

    /// Like [`get`](Self::get), failing with [`MulticallError::Timeout`] after `timeout`.
    pub fn get_timeout(&self, timeout: Duration) -> Result<Token> {
        match self.batch.wait_timeout(timeout) {
            Some(state) => state.result_at(self.index),
            None => Err(MulticallError::Timeout(timeout)),
        }
    }
}

impl fmt::Debug for CallFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallFuture")
            .field("batch", &self.batch.id())
            .field("index", &self.index)
            .field("phase", &self.batch_phase())
            .finish()
    }
}
