//! One aggregate call to the Multicall3 `aggregate` function.
//!
//! The calls of a batch are packed into `aggregate((address,bytes)[])`, the
//! response `(uint256 blockNumber, bytes[] returnData)` is unpacked back into
//! one result per call, in submission order.

use std::time::Instant;

use ethers_core::abi::{self, ParamType, Token};
use ethers_core::types::{Address, Bytes, Selector, H160, U256};
use ethers_core::utils::id;
use once_cell::sync::Lazy;

use crate::call::Call;
use crate::error::{MulticallError, Result};
use crate::transport::Transport;

/// Multicall3 deployment address, identical on most EVM chains.
pub const MULTICALL3_ADDRESS: Address = H160([
    0xca, 0x11, 0xbd, 0xe0, 0x59, 0x77, 0xb3, 0x63, 0x11, 0x67, 0x02, 0x88, 0x62, 0xbe, 0x2a, 0x17,
    0x39, 0x76, 0xca, 0x11,
]);

const AGGREGATE_FUNCTION: &str = "aggregate((address,bytes)[])";

static AGGREGATE_SELECTOR: Lazy<Selector> = Lazy::new(|| id(AGGREGATE_FUNCTION));

fn aggregate_output_types() -> [ParamType; 2] {
    [
        ParamType::Uint(256),
        ParamType::Array(Box::new(ParamType::Bytes)),
    ]
}

/// Result of one call inside an aggregate: the decoded value or why it could not be decoded.
pub type CallResult = Result<Token>;

/// Decoded aggregate response.
#[derive(Debug, Clone)]
pub struct AggregateResult {
    /// Block the aggregate was executed at.
    pub block_number: U256,
    /// One entry per call, in submission order.
    pub results: Vec<CallResult>,
}

/// A list of calls executed as a single `aggregate` call.
#[derive(Debug, Clone)]
pub struct Multicall {
    aggregator: Address,
    calls: Vec<Call>,
}

impl Multicall {
    pub fn new(aggregator: Address) -> Self {
        Self::with_calls(aggregator, Vec::new())
    }

    pub fn with_calls(aggregator: Address, calls: Vec<Call>) -> Self {
        Self { aggregator, calls }
    }

    pub fn add(&mut self, call: Call) -> &mut Self {
        self.calls.push(call);
        self
    }

    pub fn aggregator(&self) -> Address {
        self.aggregator
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Calldata of the aggregate call.
    pub fn encode(&self) -> Bytes {
        let pairs = self
            .calls
            .iter()
            .map(|call| {
                Token::Tuple(vec![
                    Token::Address(call.target()),
                    Token::Bytes(call.data().to_vec()),
                ])
            })
            .collect();

        let mut data = AGGREGATE_SELECTOR.to_vec();
        data.extend(abi::encode(&[Token::Array(pairs)]));
        data.into()
    }

    /// Unpacks the aggregate return data.
    ///
    /// A broken envelope fails the whole batch. Once the envelope is valid each
    /// call is decoded on its own: one bad output only fails its own slot.
    pub fn decode(&self, raw: &[u8]) -> Result<AggregateResult> {
        let mut envelope = abi::decode(&aggregate_output_types(), raw)
            .map_err(|err| MulticallError::MalformedResponse(err.to_string()))?
            .into_iter();

        let (Some(Token::Uint(block_number)), Some(Token::Array(outputs))) =
            (envelope.next(), envelope.next())
        else {
            return Err(MulticallError::MalformedResponse(
                "unexpected aggregate output layout".to_string(),
            ));
        };

        if outputs.len() != self.calls.len() {
            return Err(MulticallError::MalformedResponse(format!(
                "expected {} outputs, got {}",
                self.calls.len(),
                outputs.len()
            )));
        }

        let results = self
            .calls
            .iter()
            .zip(outputs)
            .enumerate()
            .map(|(index, (call, output))| match output {
                Token::Bytes(output) => {
                    call.decode_output(&output)
                        .map_err(|err| MulticallError::DecodeError {
                            index,
                            reason: err.to_string(),
                        })
                }
                other => Err(MulticallError::DecodeError {
                    index,
                    reason: format!("expected bytes, got {other:?}"),
                }),
            })
            .collect();

        Ok(AggregateResult {
            block_number,
            results,
        })
    }

    /// Sends the aggregate through `transport` and decodes the answer.
    pub fn call<T: Transport + ?Sized>(&self, transport: &T) -> Result<AggregateResult> {
        let start = Instant::now();
        let raw = transport
            .call(self.aggregator, self.encode())
            .map_err(MulticallError::transport)?;
        log::debug!(
            "aggregate of {} call(s) executed in {:?}",
            self.calls.len(),
            start.elapsed()
        );

        self.decode(&raw)
    }
}

/// Return data of an `aggregate` call, as a node would send it back.
pub fn encode_aggregate_response(block_number: U256, outputs: Vec<Vec<u8>>) -> Bytes {
    abi::encode(&[
        Token::Uint(block_number),
        Token::Array(outputs.into_iter().map(Token::Bytes).collect()),
    ])
    .into()
}

/// Splits aggregate calldata back into `(target, calldata)` pairs.
pub fn decode_aggregate_calldata(data: &[u8]) -> Result<Vec<(Address, Vec<u8>)>> {
    let Some(args) = data.strip_prefix(AGGREGATE_SELECTOR.as_slice()) else {
        return Err(MulticallError::MalformedResponse(
            "calldata does not start with the aggregate selector".to_string(),
        ));
    };

    let pair_type = ParamType::Tuple(vec![ParamType::Address, ParamType::Bytes]);
    let tokens = abi::decode(&[ParamType::Array(Box::new(pair_type))], args)
        .map_err(|err| MulticallError::MalformedResponse(err.to_string()))?;

    tokens
        .into_iter()
        .next()
        .and_then(Token::into_array)
        .unwrap_or_default()
        .into_iter()
        .map(|pair| match pair {
            Token::Tuple(mut fields) if fields.len() == 2 => {
                match (fields.remove(0), fields.remove(0)) {
                    (Token::Address(target), Token::Bytes(data)) => Ok((target, data)),
                    other => Err(MulticallError::MalformedResponse(format!(
                        "unexpected call pair {other:?}"
                    ))),
                }
            }
            other => Err(MulticallError::MalformedResponse(format!(
                "unexpected call pair {other:?}"
            ))),
        })
        .collect()
}
