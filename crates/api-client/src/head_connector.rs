use crate::backoff::Backoff;
use crate::error::ApiError;
use crate::responses::{parse_head_notification, RpcRequest, RpcResponse};
use core_types::BlockNumber;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

const SUBSCRIBE_REQUEST_ID: u64 = 1;

/// What the head subscription reports to its consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadEvent {
    /// The node acknowledged `eth_subscribe`. Sent on every (re)subscription.
    Subscribed,
    /// A new chain head was announced.
    NewHead(BlockNumber),
    /// The whole feed dropped. The connector will retry after `retry_in`.
    SubscriptionLost { reason: String, retry_in: Duration },
}

enum SessionEnd {
    Closed(String),
    ReceiverDropped,
}

/// Maintains the `newHeads` WebSocket subscription against the upstream node.
pub struct HeadConnector {
    url: Url,
    backoff: Backoff,
}

impl HeadConnector {
    pub fn new(ws_url: &str, backoff: Backoff) -> Result<Self, ApiError> {
        let url = Url::parse(ws_url).map_err(|e| ApiError::InvalidUrl(ws_url.to_string(), e.to_string()))?;
        match url.scheme() {
            "ws" | "wss" => Ok(Self { url, backoff }),
            other => Err(ApiError::InvalidUrl(
                ws_url.to_string(),
                format!("unsupported scheme '{}'", other),
            )),
        }
    }

    /// Spawns the subscription task and returns the channel it reports on.
    ///
    /// The task reconnects with exponential backoff whenever the feed drops,
    /// and exits once the receiver is dropped.
    pub fn subscribe_new_heads(&self) -> mpsc::Receiver<HeadEvent> {
        let (tx, rx) = mpsc::channel(1024);
        let url = self.url.clone();
        let mut backoff = self.backoff.clone();

        tokio::spawn(async move {
            loop {
                tracing::info!(url = %url, "Connecting to upstream head feed...");
                let reason = match run_session(url.as_str(), &tx, &mut backoff).await {
                    Ok(SessionEnd::ReceiverDropped) => {
                        tracing::info!("Head consumer dropped. Closing upstream subscription.");
                        return;
                    }
                    Ok(SessionEnd::Closed(reason)) => reason,
                    Err(e) => e.to_string(),
                };

                let retry_in = backoff.next_delay();
                tracing::error!(
                    reason = %reason,
                    retry_in_ms = retry_in.as_millis() as u64,
                    "Upstream head subscription lost."
                );
                if tx
                    .send(HeadEvent::SubscriptionLost { reason, retry_in })
                    .await
                    .is_err()
                {
                    return;
                }
                tokio::time::sleep(retry_in).await;
            }
        });

        rx
    }
}

/// One connect-subscribe-stream cycle. Returns when the connection ends.
async fn run_session(
    url: &str,
    tx: &mpsc::Sender<HeadEvent>,
    backoff: &mut Backoff,
) -> Result<SessionEnd, ApiError> {
    let (mut stream, _) = connect_async(url)
        .await
        .map_err(|e| ApiError::WebSocket(e.to_string()))?;

    let request = RpcRequest::new(SUBSCRIBE_REQUEST_ID, "eth_subscribe", json!(["newHeads"]));
    let body = serde_json::to_string(&request).map_err(|e| ApiError::Deserialization(e.to_string()))?;
    stream
        .send(Message::Text(body))
        .await
        .map_err(|e| ApiError::WebSocket(e.to_string()))?;

    let mut subscribed = false;
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if !subscribed {
                    if let Some(subscription_id) = parse_subscribe_ack(&text)? {
                        subscribed = true;
                        backoff.reset();
                        tracing::info!(subscription = %subscription_id, "Subscribed to upstream newHeads.");
                        if tx.send(HeadEvent::Subscribed).await.is_err() {
                            return Ok(SessionEnd::ReceiverDropped);
                        }
                        continue;
                    }
                }
                match parse_head_notification(&text) {
                    Ok(Some(number)) => {
                        tracing::trace!(block = number, "Head notification received.");
                        if tx.send(HeadEvent::NewHead(number)).await.is_err() {
                            return Ok(SessionEnd::ReceiverDropped);
                        }
                    }
                    // Skip unrelated frames silently
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to parse upstream head notification.");
                    }
                }
            }
            Ok(Message::Close(frame)) => {
                return Ok(SessionEnd::Closed(format!("closed by node: {:?}", frame)));
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(other) => {
                tracing::debug!("Ignoring non-text upstream frame ({} bytes).", other.len());
            }
            Err(e) => return Err(ApiError::WebSocket(e.to_string())),
        }
    }

    Ok(SessionEnd::Closed("stream ended".to_string()))
}

/// Recognises the reply to our `eth_subscribe` request.
///
/// Returns the subscription id, `None` for frames that are not the reply, or
/// an error when the node rejected the subscription.
fn parse_subscribe_ack(text: &str) -> Result<Option<String>, ApiError> {
    let Ok(response) = serde_json::from_str::<RpcResponse<String>>(text) else {
        return Ok(None);
    };
    if response.id != Some(SUBSCRIBE_REQUEST_ID) {
        return Ok(None);
    }
    match response.into_result()? {
        Some(id) => Ok(Some(id)),
        None => Err(ApiError::Deserialization(
            "eth_subscribe returned no subscription id".to_string(),
        )),
    }
}
