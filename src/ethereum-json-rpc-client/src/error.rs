//! Error types for the Ethereum JSON-RPC client.

use jsonrpc_core::Failure;
use thiserror::Error;

/// Result type for the Ethereum JSON-RPC client.
pub type JsonRpcResult<T> = std::result::Result<T, JsonRpcError>;

/// Error type for the Ethereum JSON-RPC client.
#[derive(Error, Debug)]
pub enum JsonRpcError {
    /// Error while (de)serializing JSON values.
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The node failed to process the request. See [`Failure`] for details,
    /// and [`jsonrpc_core::Error`] in particular to get the message and the code.
    #[error("node error: {}", .0.error.message)]
    Node(Failure),
    /// HTTP error.
    #[cfg(feature = "reqwest")]
    #[error("HTTP error {code}: {text}")]
    Http {
        /// HTTP status code.
        code: reqwest::StatusCode,
        /// HTTP response text.
        text: String,
    },
    /// Reqwest error.
    #[cfg(feature = "reqwest")]
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    /// A single request was sent, but a batch response was received.
    #[error("unexpected batch response: expected single but got batch")]
    UnexpectedBatch,
}

impl From<Failure> for JsonRpcError {
    fn from(err: Failure) -> Self {
        JsonRpcError::Node(err)
    }
}
