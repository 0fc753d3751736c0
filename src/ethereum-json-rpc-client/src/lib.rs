use std::sync::Arc;

use ethers_core::types::{Address, BlockNumber, Bytes, U64};
pub use jsonrpc_core::{Call, Id, MethodCall, Output, Params, Request, Response, Version};
use serde::de::DeserializeOwned;
use serde_json::json;

pub mod error;

#[cfg(feature = "reqwest")]
pub mod reqwest;

pub use error::{JsonRpcError, JsonRpcResult};

const ETH_CHAIN_ID_METHOD: &str = "eth_chainId";
const ETH_BLOCK_NUMBER_METHOD: &str = "eth_blockNumber";
const ETH_CALL_METHOD: &str = "eth_call";

macro_rules! make_params_array {
    ($($items:expr),*) => {
        Params::Array(vec![$(serde_json::to_value($items)?, )*])
    };
}

/// A blocking client for interacting with an Ethereum node over JSON-RPC.
#[derive(Clone)]
pub struct EthJsonRpcClient<C: Client> {
    client: C,
}

impl<C: Client> EthJsonRpcClient<C> {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `client` - The transport used to send the JSON-RPC requests.
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// Returns the underlying transport.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Returns chain block number
    pub fn get_block_number(&self) -> JsonRpcResult<u64> {
        self.single_request::<U64>(
            ETH_BLOCK_NUMBER_METHOD.to_string(),
            make_params_array!(),
            Id::Str(ETH_BLOCK_NUMBER_METHOD.to_string()),
        )
        .map(|v| v.as_u64())
    }

    /// Returns chain id
    pub fn get_chain_id(&self) -> JsonRpcResult<u64> {
        self.single_request::<U64>(
            ETH_CHAIN_ID_METHOD.to_string(),
            Params::Array(vec![]),
            Id::Str(ETH_CHAIN_ID_METHOD.to_string()),
        )
        .map(|v| v.as_u64())
    }

    /// Performs a read-only `eth_call` of `data` against `to` and returns the raw return data.
    pub fn eth_call(&self, to: Address, data: Bytes, block: BlockNumber) -> JsonRpcResult<Bytes> {
        self.single_request(
            ETH_CALL_METHOD.to_string(),
            make_params_array!(json!({ "to": to, "data": data }), block),
            // For some reason some JSON RPC services fail to parse requests with null id
            Id::Str(ETH_CALL_METHOD.to_string()),
        )
    }

    /// Performs a request.
    pub fn request(&self, request: Request) -> JsonRpcResult<Response> {
        self.client.send_rpc_request(request)
    }

    /// Performs a single request.
    pub fn single_request<R: DeserializeOwned>(
        &self,
        method: String,
        params: Params,
        id: Id,
    ) -> JsonRpcResult<R> {
        let request = Request::Single(Call::MethodCall(MethodCall {
            jsonrpc: Some(Version::V2),
            method,
            params,
            id,
        }));

        let response = self.client.send_rpc_request(request)?;

        match response {
            Response::Single(response) => match response {
                Output::Success(result) => Ok(serde_json::from_value(result.result)?),
                Output::Failure(err) => Err(err.into()),
            },
            Response::Batch(_) => Err(JsonRpcError::UnexpectedBatch),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait Client: Send + Sync {
    /// Send RPC request, blocking the calling thread until the node answers.
    fn send_rpc_request(&self, request: Request) -> JsonRpcResult<Response>;
}

impl<T: Client + ?Sized> Client for Arc<T> {
    fn send_rpc_request(&self, request: Request) -> JsonRpcResult<Response> {
        (**self).send_rpc_request(request)
    }
}

#[cfg(test)]
mod tests {
    use jsonrpc_core::{ErrorCode, Failure, Success};
    use serde_json::Value;

    use super::*;

    fn success(result: Value) -> Response {
        Response::Single(Output::Success(Success {
            jsonrpc: Some(Version::V2),
            result,
            id: Id::Num(1),
        }))
    }

    fn method_call(request: &Request) -> &MethodCall {
        match request {
            Request::Single(Call::MethodCall(call)) => call,
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn eth_call_should_send_target_and_data() {
        let mut client = MockClient::new();
        client
            .expect_send_rpc_request()
            .withf(|request| {
                let call = method_call(request);
                let Params::Array(params) = &call.params else {
                    return false;
                };
                call.method == "eth_call"
                    && params[0]["to"] == "0xca11bde05977b3631167028862be2a173976ca11"
                    && params[0]["data"] == "0x0102"
                    && params[1] == "latest"
            })
            .times(1)
            .returning(|_| Ok(success(Value::String("0xdeadbeef".to_string()))));

        let client = EthJsonRpcClient::new(client);
        let result = client
            .eth_call(
                "0xcA11bde05977b3631167028862bE2a173976CA11".parse().unwrap(),
                Bytes::from(vec![1, 2]),
                BlockNumber::Latest,
            )
            .unwrap();

        assert_eq!(result, Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]));
    }

    #[test]
    fn should_get_block_number() {
        let mut client = MockClient::new();
        client
            .expect_send_rpc_request()
            .withf(|request| method_call(request).method == ETH_BLOCK_NUMBER_METHOD)
            .returning(|_| Ok(success(Value::String("0x10".to_string()))));

        let client = EthJsonRpcClient::new(client);
        assert_eq!(client.get_block_number().unwrap(), 16);
    }

    #[test]
    fn node_failure_should_be_reported() {
        let mut client = MockClient::new();
        client.expect_send_rpc_request().returning(|_| {
            Ok(Response::Single(Output::Failure(Failure {
                jsonrpc: Some(Version::V2),
                error: jsonrpc_core::Error {
                    code: ErrorCode::ServerError(3),
                    message: "execution reverted".to_string(),
                    data: None,
                },
                id: Id::Num(1),
            })))
        });

        let client = EthJsonRpcClient::new(client);
        let err = client.get_chain_id().unwrap_err();

        assert!(matches!(err, JsonRpcError::Node(_)));
        assert_eq!(err.to_string(), "node error: execution reverted");
    }

    #[test]
    fn batch_response_to_single_request_should_fail() {
        let mut client = MockClient::new();
        client
            .expect_send_rpc_request()
            .returning(|_| Ok(Response::Batch(vec![])));

        let client = EthJsonRpcClient::new(Arc::new(client));
        assert!(matches!(
            client.get_chain_id(),
            Err(JsonRpcError::UnexpectedBatch)
        ));
    }
}
