use std::time::Duration;

use jsonrpc_core::{Request, Response};
pub use reqwest;

use crate::error::{JsonRpcError, JsonRpcResult};
use crate::Client;

/// Blocking reqwest client implementation.
#[derive(Clone)]
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
    endpoint_url: String,
}

impl ReqwestClient {
    /// Creates a new client.
    pub fn new(endpoint_url: String) -> Self {
        Self::new_with_client(endpoint_url, Default::default())
    }

    /// Creates a new client whose requests fail after `timeout`.
    pub fn new_with_timeout(endpoint_url: String, timeout: Duration) -> JsonRpcResult<Self> {
        let client = reqwest::blocking::ClientBuilder::new()
            .timeout(timeout)
            .build()?;
        Ok(Self::new_with_client(endpoint_url, client))
    }

    /// Creates a new client with a custom reqwest client.
    pub fn new_with_client(endpoint_url: String, client: reqwest::blocking::Client) -> Self {
        Self {
            endpoint_url,
            client,
        }
    }

    /// URL requests are posted to.
    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }
}

impl Client for ReqwestClient {
    fn send_rpc_request(&self, request: Request) -> JsonRpcResult<Response> {
        log::trace!("ReqwestClient - sending request {request:?}");

        let response = self
            .client
            .post(&self.endpoint_url)
            .json(&request)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(JsonRpcError::Http {
                code: status,
                text: response.text().unwrap_or_default(),
            });
        }

        let response = response.json::<Response>()?;

        log::trace!("response: {:?}", response);

        Ok(response)
    }
}
