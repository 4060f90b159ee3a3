use crate::error::ApiError;
use crate::responses::{RawBlock, RpcRequest, RpcResponse};
use async_trait::async_trait;
use core_types::{parse_quantity_u128, BlockDetail, BlockNumber, FeeData};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};

pub mod backoff;
pub mod error;
pub mod head_connector;
pub mod responses;

// --- Public API ---
pub use backoff::Backoff;
pub use head_connector::{HeadConnector, HeadEvent};

/// The request/response side of the upstream chain node.
/// The head monitor depends on this trait only, allowing the
/// underlying implementation (live node or mock) to be swapped out.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Fetches the header fields of a block by number.
    async fn get_block(&self, number: BlockNumber) -> Result<BlockDetail, ApiError>;

    /// Fetches the node's current gas price.
    async fn get_fee_data(&self) -> Result<FeeData, ApiError>;
}

/// A concrete `ChainClient` speaking JSON-RPC over HTTP.
pub struct JsonRpcClient {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(url: impl Into<String>) -> Result<Self, ApiError> {
        let url = url.into();
        url::Url::parse(&url).map_err(|e| ApiError::InvalidUrl(url.clone(), e.to_string()))?;
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            url,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<Option<T>, ApiError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::new(id, method, params);

        let response = self.client.post(&self.url).json(&request).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(ApiError::Rpc {
                code: i64::from(status.as_u16()),
                message: text,
            });
        }

        serde_json::from_str::<RpcResponse<T>>(&text)
            .map_err(|e| ApiError::Deserialization(format!("{}. Original text: {}", e, text)))?
            .into_result()
    }
}

#[async_trait]
impl ChainClient for JsonRpcClient {
    async fn get_block(&self, number: BlockNumber) -> Result<BlockDetail, ApiError> {
        let raw: Option<RawBlock> = self
            .call("eth_getBlockByNumber", json!([format!("{:#x}", number), false]))
            .await?;
        raw.ok_or(ApiError::BlockNotFound(number))?.into_detail()
    }

    async fn get_fee_data(&self) -> Result<FeeData, ApiError> {
        let price: Option<String> = self.call("eth_gasPrice", json!([])).await?;
        let price = price.ok_or_else(|| ApiError::Deserialization("eth_gasPrice returned null".to_string()))?;
        Ok(FeeData { gas_price: parse_quantity_u128(&price)? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unparseable_url() {
        assert!(matches!(
            JsonRpcClient::new("not a url"),
            Err(ApiError::InvalidUrl(_, _))
        ));
    }

    #[test]
    fn block_numbers_are_hex_encoded() {
        let request = RpcRequest::new(7, "eth_getBlockByNumber", json!([format!("{:#x}", 436u64), false]));
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["params"][0], "0x1b4");
        assert_eq!(body["jsonrpc"], "2.0");
        assert_eq!(body["id"], 7);
    }
}
