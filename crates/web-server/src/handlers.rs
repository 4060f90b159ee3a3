use crate::hub::{Connection, ConnectionId, Outbound};
use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    Json,
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub connections: usize,
    /// Highest block broadcast so far; `null` until the first one.
    pub last_block: Option<u64>,
}

/// # GET /api/health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let last_block = match state.cursor.current() {
        0 => None,
        n => Some(n),
    };
    Json(HealthResponse {
        status: "ok",
        connections: state.hub.connection_count().await,
        last_block,
    })
}

/// # GET /ws
/// Upgrades to a WebSocket and hands the socket to the connection lifecycle.
pub async fn websocket_handler(
    State(state): State<Arc<AppState>>, // State must come before WebSocketUpgrade
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Lifecycle of one subscriber, from accept to release.
///
/// The writer drains the hub's frames into the socket; the reader only
/// watches for the client going away. Whichever finishes first ends the
/// connection, which is then unregistered. A transport error counts as a close.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (connection, mut outbound) = Connection::new(state.hub_settings.client_buffer);
    let id = state.hub.register(connection).await;
    tracing::info!(connection = id, "[WS] New client connected.");

    let (sink, stream) = socket.split();
    let write_timeout = state.hub_settings.write_timeout();

    tokio::select! {
        _ = write_frames(sink, &mut outbound, write_timeout) => {}
        _ = watch_client(stream, id) => {}
    }

    outbound.mark_closing();
    state.hub.unregister(id).await;
    tracing::info!(connection = id, "[WS] Connection closed.");
}

async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    outbound: &mut Outbound,
    write_timeout: Duration,
) {
    let id = outbound.id();
    while let Some(frame) = outbound.next_frame().await {
        match tokio::time::timeout(write_timeout, sink.send(Message::Text(frame.to_string()))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(connection = id, error = %e, "[WS] Write failed.");
                return;
            }
            Err(_) => {
                tracing::warn!(connection = id, timeout_ms = write_timeout.as_millis() as u64, "[WS] Write timed out.");
                return;
            }
        }
    }
    // The hub dropped us (slow or closed). Say goodbye if the socket still listens.
    let _ = tokio::time::timeout(write_timeout, sink.close()).await;
}

async fn watch_client(mut stream: SplitStream<WebSocket>, id: ConnectionId) {
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Close(_)) => {
                tracing::info!(connection = id, "[WS] Client disconnected.");
                return;
            }
            Ok(_) => {
                // Inbound client messages carry no meaning here.
            }
            Err(e) => {
                tracing::debug!(connection = id, error = %e, "[WS] Read error.");
                return;
            }
        }
    }
}
