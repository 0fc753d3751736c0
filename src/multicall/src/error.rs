use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MulticallError>;

/// Errors surfaced by the multicall executor and its building blocks.
///
/// The type is `Clone` because a single batch failure is handed to every
/// future of that batch. Transport failures are kept behind an [`Arc`] so all
/// of those futures observe the very same error.
#[derive(Debug, Error, Clone)]
pub enum MulticallError {
    #[error("invalid signature `{signature}`: {reason}")]
    InvalidSignature { signature: String, reason: String },

    #[error("invalid call arguments: {0}")]
    InvalidArguments(String),

    #[error("no endpoint available: the pool is empty")]
    NoEndpointAvailable,

    #[error("transport error: {0:#}")]
    Transport(Arc<anyhow::Error>),

    #[error("malformed aggregate response: {0}")]
    MalformedResponse(String),

    #[error("failed to decode the output of call {index}: {reason}")]
    DecodeError { index: usize, reason: String },

    #[error("no result for call {0} in a resolved batch")]
    ResultIndexMissing(usize),

    #[error("the batch was cancelled before dispatch")]
    Cancelled,

    #[error("timed out after {0:?} waiting for the batch")]
    Timeout(Duration),

    #[error("invalid executor configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to start executor threads: {0}")]
    Startup(String),
}

impl MulticallError {
    pub(crate) fn invalid_signature(signature: &str, reason: impl Into<String>) -> Self {
        Self::InvalidSignature {
            signature: signature.to_owned(),
            reason: reason.into(),
        }
    }

    pub(crate) fn transport(err: anyhow::Error) -> Self {
        Self::Transport(Arc::new(err))
    }
}
