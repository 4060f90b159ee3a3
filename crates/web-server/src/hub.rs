use async_trait::async_trait;
use events::{Envelope, EnvelopeSink};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

pub type ConnectionId = u64;

/// A pre-serialized envelope, shared by every connection it is sent to.
pub type Frame = Arc<str>;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Liveness of a subscriber connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Open,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

#[derive(Debug, Clone)]
struct SharedState(Arc<AtomicU8>);

impl SharedState {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(ConnectionState::Connecting as u8)))
    }

    fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// The hub's side of one subscriber: a bounded frame queue plus its liveness.
///
/// Owned exclusively by the hub's membership set once registered. Dropping
/// it closes the queue, which ends the connection's writer.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    state: SharedState,
    frames: mpsc::Sender<Frame>,
}

/// The transport's side of one subscriber: drains frames into the socket.
#[derive(Debug)]
pub struct Outbound {
    id: ConnectionId,
    state: SharedState,
    frames: mpsc::Receiver<Frame>,
}

impl Connection {
    /// Creates a connection whose queue holds at most `capacity` unsent frames.
    pub fn new(capacity: usize) -> (Connection, Outbound) {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let state = SharedState::new();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Connection { id, state: state.clone(), frames: tx },
            Outbound { id, state, frames: rx },
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open && !self.frames.is_closed()
    }

    /// Never waits: a full queue means the client is not keeping up.
    fn try_send(&self, frame: Frame) -> bool {
        self.frames.try_send(frame).is_ok()
    }
}

impl Outbound {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Next frame to write, or `None` once the hub has dropped the connection.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.frames.recv().await
    }

    /// Called by the transport when the socket is going away.
    pub fn mark_closing(&self) {
        if self.state.get() != ConnectionState::Closed {
            self.state.set(ConnectionState::Closing);
        }
    }
}

/// Owns the set of live subscriber connections and fans every envelope out to them.
///
/// All membership changes and every fan-out pass happen under one lock, so a
/// publish never observes a half-registered connection and per-connection
/// frame order always matches publish order.
#[derive(Debug, Default)]
pub struct BroadcastHub {
    members: Mutex<HashMap<ConnectionId, Connection>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection and queues the SYSTEM handshake as its first frame.
    ///
    /// Does not wait on the client. If the handshake cannot even be queued the
    /// connection is not admitted.
    pub async fn register(&self, connection: Connection) -> ConnectionId {
        let id = connection.id();
        let handshake = match Envelope::handshake().to_json() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(connection = id, error = %e, "Failed to serialize handshake.");
                return id;
            }
        };

        let mut members = self.members.lock().await;
        connection.state.set(ConnectionState::Open);
        if !connection.try_send(handshake) {
            connection.state.set(ConnectionState::Closed);
            tracing::warn!(connection = id, "Could not queue handshake. Connection rejected.");
            return id;
        }
        members.insert(id, connection);
        tracing::info!(connection = id, clients = members.len(), "Client registered.");
        id
    }

    /// Removes a connection. Unknown ids are ignored. Returns whether it was a member.
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let mut members = self.members.lock().await;
        match members.remove(&id) {
            Some(connection) => {
                connection.state.set(ConnectionState::Closed);
                tracing::info!(connection = id, clients = members.len(), "Client unregistered.");
                true
            }
            None => false,
        }
    }

    /// Serializes the envelope once and queues it on every open connection.
    ///
    /// A connection that is no longer open, or whose queue is full, is
    /// dropped on the spot. Nothing is reported back to the caller.
    pub async fn publish(&self, envelope: Envelope) {
        let frame = match envelope.to_json() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(kind = ?envelope.kind(), error = %e, "Failed to serialize envelope. Dropped.");
                return;
            }
        };

        let mut members = self.members.lock().await;
        if members.is_empty() {
            return;
        }

        let dropped: Vec<ConnectionId> = members
            .values()
            .filter(|connection| !(connection.is_open() && connection.try_send(Arc::clone(&frame))))
            .map(Connection::id)
            .collect();

        for id in dropped {
            if let Some(connection) = members.remove(&id) {
                connection.state.set(ConnectionState::Closed);
                tracing::info!(connection = id, "Dropping client that is closed or not keeping up.");
            }
        }
        tracing::trace!(kind = ?envelope.kind(), clients = members.len(), "Envelope fanned out.");
    }

    pub async fn connection_count(&self) -> usize {
        self.members.lock().await.len()
    }

    pub async fn member_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.members.lock().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[async_trait]
impl EnvelopeSink for BroadcastHub {
    async fn publish(&self, envelope: Envelope) {
        BroadcastHub::publish(self, envelope).await;
    }
}
