use alloy::transports::{RpcError, TransportErrorKind};
use thiserror::Error;

/// Descriptive failures produced by [`normalize_error`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Couldn't get information because of node errors {response} or wrong params {params:?}")]
    NodeFailure { response: String, params: Vec<String> },
    #[error("Couldn't get information because of rpc node problems \"{message}\"")]
    RpcNodeUnavailable { message: String },
    #[error("fromBlockNumber {from} must be less than or equal to toBlockNumber {to}")]
    InvalidRange { from: u64, to: u64 },
    #[error("Network type required")]
    MissingNetwork,
}

/// Maps transport and node failures into [`GatewayError`]s: HTTP 500 is a
/// node failure, any other transport problem (401, refused connection) means
/// the node is unavailable. Anything else is returned untouched.
pub fn normalize_error(err: anyhow::Error, params: &[String]) -> anyhow::Error {
    if let Some(RpcError::Transport(kind)) = err.downcast_ref::<RpcError<TransportErrorKind>>() {
        let mapped = match kind {
            TransportErrorKind::HttpError(http) if http.status == 500 => GatewayError::NodeFailure {
                response: http.body.clone(),
                params: params.to_vec(),
            },
            other => GatewayError::RpcNodeUnavailable {
                message: other.to_string(),
            },
        };
        return mapped.into();
    }

    err
}
