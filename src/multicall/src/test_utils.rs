//! In-memory chain for exercising the executor without a node.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use ethers_core::abi::{self, Token};
use ethers_core::types::{Address, Bytes, U256};
use parking_lot::Mutex;

use crate::aggregate::{decode_aggregate_calldata, encode_aggregate_response};
use crate::transport::Transport;

type Contract = Box<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

/// A [`Transport`] answering aggregate calls from registered contracts.
///
/// Each contract is a function from calldata (selector included) to return
/// data. Calls to unknown targets return empty data. Every aggregate received
/// is recorded, in arrival order.
#[derive(Default)]
pub struct FakeChain {
    contracts: HashMap<Address, Contract>,
    block_number: u64,
    latency: Duration,
    failure: Option<String>,
    raw_response: Option<Vec<u8>>,
    aggregates: Mutex<Vec<Vec<(Address, Vec<u8>)>>>,
    in_flight: AtomicUsize,
    peak_concurrency: AtomicUsize,
}

impl FakeChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contract(
        mut self,
        target: Address,
        contract: impl Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
    ) -> Self {
        self.contracts.insert(target, Box::new(contract));
        self
    }

    /// Registers a contract answering every call with the encoded `output`.
    pub fn returning(self, target: Address, output: Vec<Token>) -> Self {
        let encoded = abi::encode(&output);
        self.with_contract(target, move |_| encoded.clone())
    }

    pub fn with_block_number(mut self, block_number: u64) -> Self {
        self.block_number = block_number;
        self
    }

    /// Sleeps this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fails every aggregate with `message`.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Answers every aggregate with `raw`, bypassing the contracts.
    pub fn with_raw_response(mut self, raw: Vec<u8>) -> Self {
        self.raw_response = Some(raw);
        self
    }

    /// `(target, calldata)` pairs of every aggregate received.
    pub fn aggregates(&self) -> Vec<Vec<(Address, Vec<u8>)>> {
        self.aggregates.lock().clone()
    }

    /// Number of calls in every aggregate received.
    pub fn aggregate_sizes(&self) -> Vec<usize> {
        self.aggregates.lock().iter().map(Vec::len).collect()
    }

    /// Highest number of aggregates that were being answered at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak_concurrency.load(Ordering::SeqCst)
    }
}

impl Transport for FakeChain {
    fn call(&self, _target: Address, data: Bytes) -> anyhow::Result<Bytes> {
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_concurrency.fetch_max(in_flight, Ordering::SeqCst);
        let result = self.answer(&data);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl FakeChain {
    fn answer(&self, data: &[u8]) -> anyhow::Result<Bytes> {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }

        let calls = decode_aggregate_calldata(data)?;
        self.aggregates.lock().push(calls.clone());

        if let Some(message) = &self.failure {
            anyhow::bail!("{message}");
        }
        if let Some(raw) = &self.raw_response {
            return Ok(raw.clone().into());
        }

        let outputs = calls
            .iter()
            .map(|(target, calldata)| {
                self.contracts
                    .get(target)
                    .map(|contract| contract(calldata))
                    .unwrap_or_default()
            })
            .collect();

        Ok(encode_aggregate_response(
            U256::from(self.block_number),
            outputs,
        ))
    }
}
