use configuration::HubSettings;
use engine::BlockCursor;
use events::{AlertLevel, Envelope, EnvelopeType, Payload};
use futures_util::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use web_server::{AppState, BroadcastHub};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server() -> (SocketAddr, Arc<BroadcastHub>) {
    let hub = Arc::new(BroadcastHub::new());
    let state = Arc::new(AppState {
        hub: Arc::clone(&hub),
        cursor: Arc::new(BlockCursor::new()),
        hub_settings: HubSettings::default(),
    });
    let listener = web_server::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(web_server::serve(listener, state, std::future::pending()));
    (addr, hub)
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    client
}

async fn next_envelope(client: &mut Client) -> Envelope {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return Envelope::from_json(&text).unwrap();
        }
    }
}

async fn wait_for_clients(hub: &BroadcastHub, expected: usize) {
    for _ in 0..250 {
        if hub.connection_count().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("hub never reached {} clients", expected);
}

fn alert_text(envelope: &Envelope) -> &str {
    match envelope.payload() {
        Payload::Alert(a) => &a.message,
        other => panic!("expected an alert, got {:?}", other),
    }
}

#[tokio::test]
async fn client_gets_handshake_then_broadcasts() {
    let (addr, hub) = start_server().await;
    let mut client = connect(addr).await;

    let first = next_envelope(&mut client).await;
    assert_eq!(first.kind(), EnvelopeType::System);

    hub.publish(Envelope::alert(AlertLevel::Info, "one")).await;
    hub.publish(Envelope::alert(AlertLevel::Info, "two")).await;

    assert_eq!(alert_text(&next_envelope(&mut client).await), "one");
    assert_eq!(alert_text(&next_envelope(&mut client).await), "two");
}

#[tokio::test]
async fn closed_client_leaves_and_others_keep_receiving() {
    let (addr, hub) = start_server().await;
    let mut staying = connect(addr).await;
    let mut leaving = connect(addr).await;
    next_envelope(&mut staying).await;
    next_envelope(&mut leaving).await;
    wait_for_clients(&hub, 2).await;

    leaving.close(None).await.unwrap();
    wait_for_clients(&hub, 1).await;

    hub.publish(Envelope::alert(AlertLevel::Warn, "still here")).await;
    assert_eq!(alert_text(&next_envelope(&mut staying).await), "still here");
}

#[tokio::test]
async fn dropped_socket_is_unregistered() {
    let (addr, hub) = start_server().await;
    let mut client = connect(addr).await;
    next_envelope(&mut client).await;
    wait_for_clients(&hub, 1).await;

    drop(client);
    wait_for_clients(&hub, 0).await;
    // Publishing to nobody is harmless.
    hub.publish(Envelope::alert(AlertLevel::Info, "anyone?")).await;
}
