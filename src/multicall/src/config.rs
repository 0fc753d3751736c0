use std::time::Duration;

use ethers_core::types::Address;

use crate::aggregate::MULTICALL3_ADDRESS;
use crate::error::{MulticallError, Result};

pub const DEFAULT_WORKER_COUNT: usize = 4;
pub const DEFAULT_MAX_BATCH_SIZE: usize = 20;
pub const DEFAULT_MAX_BATCH_WINDOW: Duration = Duration::from_millis(50);
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(10);

/// Settings of a [`MulticallExecutor`](crate::MulticallExecutor).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Number of worker threads executing batches concurrently.
    pub worker_count: usize,
    /// A batch is dispatched as soon as it holds this many calls.
    pub max_batch_size: usize,
    /// A batch is dispatched once it is this old, whatever its size.
    pub max_batch_window: Duration,
    /// How often the pending batch is checked against the window.
    pub tick_interval: Duration,
    /// Address of the Multicall3 aggregator contract.
    pub aggregator: Address,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_batch_window: DEFAULT_MAX_BATCH_WINDOW,
            tick_interval: DEFAULT_TICK_INTERVAL,
            aggregator: MULTICALL3_ADDRESS,
        }
    }
}

impl ExecutorConfig {
    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    pub fn with_max_batch_window(mut self, max_batch_window: Duration) -> Self {
        self.max_batch_window = max_batch_window;
        self
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    /// Overrides the aggregator, for chains where Multicall3 lives elsewhere.
    pub fn with_aggregator(mut self, aggregator: Address) -> Self {
        self.aggregator = aggregator;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(MulticallError::InvalidConfig(
                "worker_count must be at least 1".to_string(),
            ));
        }
        if self.max_batch_size == 0 {
            return Err(MulticallError::InvalidConfig(
                "max_batch_size must be at least 1".to_string(),
            ));
        }
        if self.tick_interval.is_zero() {
            return Err(MulticallError::InvalidConfig(
                "tick_interval must not be zero".to_string(),
            ));
        }
        Ok(())
    }
}
