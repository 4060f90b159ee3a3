use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Upstream node error: {0}")]
    Upstream(#[from] api_client::error::ApiError),

    #[error("Fetching block {block} timed out after {after_ms}ms")]
    Timeout { block: u64, after_ms: u64 },

    #[error("Requested block {requested} but the node returned block {received}")]
    BlockMismatch { requested: u64, received: u64 },

    #[error("Failed to sample metrics: {0}")]
    Metrics(String),
}
