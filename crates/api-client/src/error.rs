use core_types::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP request to the node failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("The node returned a JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Failed to deserialize the node response: {0}")]
    Deserialization(String),

    #[error("Invalid data format from node: {0}")]
    InvalidData(#[from] CoreError),

    #[error("Block {0} is not known to the node")]
    BlockNotFound(u64),

    #[error("Invalid upstream URL '{0}': {1}")]
    InvalidUrl(String, String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),
}
