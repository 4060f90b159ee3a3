use crate::error::ApiError;
use chrono::{TimeZone, Utc};
use core_types::{parse_quantity, parse_quantity_u128, BlockDetail, BlockNumber, CoreError};
use serde::{Deserialize, Serialize};

/// A JSON-RPC 2.0 request body.
#[derive(Debug, Serialize)]
pub struct RpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: serde_json::Value,
}

impl<'a> RpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: serde_json::Value) -> Self {
        Self { jsonrpc: "2.0", id, method, params }
    }
}

#[derive(Debug, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

/// A JSON-RPC 2.0 response. Exactly one of `result`/`error` is set by a well-behaved node.
#[derive(Debug, Deserialize)]
pub struct RpcResponse<T> {
    #[serde(default)]
    pub id: Option<u64>,
    pub result: Option<T>,
    #[serde(default)]
    pub error: Option<RpcErrorObject>,
}

impl<T> RpcResponse<T> {
    /// Unwraps the response into its result. A `null` result is reported as `Ok(None)`.
    pub fn into_result(self) -> Result<Option<T>, ApiError> {
        if let Some(err) = self.error {
            return Err(ApiError::Rpc { code: err.code, message: err.message });
        }
        Ok(self.result)
    }
}

/// The fields of `eth_getBlockByNumber` we read. Everything is a hex quantity.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBlock {
    pub number: String,
    pub timestamp: String,
    #[serde(default)]
    pub base_fee_per_gas: Option<String>,
}

impl RawBlock {
    pub fn into_detail(self) -> Result<BlockDetail, ApiError> {
        let number = parse_quantity(&self.number)?;
        let secs = parse_quantity(&self.timestamp)?;
        let secs = i64::try_from(secs)
            .map_err(|_| CoreError::OutOfRange(format!("block timestamp {}", self.timestamp)))?;
        let timestamp = Utc
            .timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| CoreError::OutOfRange(format!("block timestamp {}", self.timestamp)))?;
        let base_fee_per_gas = self
            .base_fee_per_gas
            .as_deref()
            .map(parse_quantity_u128)
            .transpose()?;

        Ok(BlockDetail { number, timestamp, base_fee_per_gas })
    }
}

// --- Subscription Deserialization ---

#[derive(Debug, Deserialize)]
struct SubscriptionNotification {
    params: SubscriptionParams,
}

#[derive(Debug, Deserialize)]
struct SubscriptionParams {
    result: HeadResult,
}

#[derive(Debug, Deserialize)]
struct HeadResult {
    number: String,
}

/// Extracts the block number from an `eth_subscription` newHeads frame.
///
/// Returns `Ok(None)` for frames that are not head notifications (acks,
/// other subscriptions), and an error when a head notification is malformed.
pub fn parse_head_notification(text: &str) -> Result<Option<BlockNumber>, ApiError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| ApiError::Deserialization(e.to_string()))?;
    if value.get("method").and_then(|m| m.as_str()) != Some("eth_subscription") {
        return Ok(None);
    }
    let notification: SubscriptionNotification =
        serde_json::from_value(value).map_err(|e| ApiError::Deserialization(e.to_string()))?;
    Ok(Some(parse_quantity(&notification.params.result.number)?))
}
