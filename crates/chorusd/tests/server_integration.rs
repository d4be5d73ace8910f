//! Integration tests for the WebSocket server.
//!
//! These tests run a real `ChatServer` on a loopback port and talk to it
//! with real WebSocket clients, covering registration, broadcast fan-out,
//! disconnect cleanup and graceful shutdown.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.

use std::net::SocketAddr;
use std::time::Duration;

use chorus_core::ConnectionId;
use chorusd::config::ServerConfig;
use chorusd::registry::{spawn_registry_with_capacity, RegistryEvent, RegistryHandle};
use chorusd::server::ChatServer;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

/// Maximum time to wait for a message or registry change
const WAIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Interval between registry polls
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long to listen when asserting that nothing arrives
const QUIET_PERIOD: Duration = Duration::from_millis(200);

// ============================================================================
// Test Helpers
// ============================================================================

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Test server context that manages server lifecycle.
struct TestServer {
    addr: SocketAddr,
    registry: RegistryHandle,
    cancel_token: CancellationToken,
}

impl TestServer {
    /// Spawns a server with default settings on an ephemeral port.
    async fn spawn() -> Self {
        Self::spawn_with(ServerConfig::default()).await
    }

    /// Spawns a server with the given settings on an ephemeral port.
    async fn spawn_with(config: ServerConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");

        let registry = spawn_registry_with_capacity(config.max_connections);
        let cancel_token = CancellationToken::new();
        let server = ChatServer::new(config, registry.clone(), cancel_token.clone());

        tokio::spawn(async move {
            let _ = server.serve(listener).await;
        });

        TestServer {
            addr,
            registry,
            cancel_token,
        }
    }

    /// Connects a client and waits until the server has registered it.
    async fn connect(&self) -> TestClient {
        let mut events = self.registry.subscribe();
        let (ws, _) = connect_async(format!("ws://{}", self.addr))
            .await
            .expect("connect to server");

        let id = timeout(WAIT_TIMEOUT, async {
            loop {
                if let Ok(RegistryEvent::Joined { id, .. }) = events.recv().await {
                    return id;
                }
            }
        })
        .await
        .expect("client registered");

        TestClient { ws, id }
    }

    /// Waits until the registry holds exactly `expected` connections.
    async fn wait_for_count(&self, expected: usize) {
        let result = timeout(WAIT_TIMEOUT, async {
            while self.registry.connection_count().await != expected {
                sleep(POLL_INTERVAL).await;
            }
        })
        .await;
        assert!(
            result.is_ok(),
            "registry did not reach {expected} connections (has {})",
            self.registry.connection_count().await
        );
    }

    /// Registered ids, in broadcast order.
    async fn member_ids(&self) -> Vec<ConnectionId> {
        self.registry
            .snapshot()
            .await
            .iter()
            .map(|c| c.id())
            .collect()
    }

    fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

/// Test client with helpers for the raw text protocol.
struct TestClient {
    ws: Ws,
    id: ConnectionId,
}

impl TestClient {
    async fn send(&mut self, text: &str) {
        self.ws.send(Message::text(text)).await.expect("send");
    }

    /// Receives the next text message, skipping control frames.
    async fn recv(&mut self) -> String {
        loop {
            let msg = timeout(WAIT_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for message")
                .expect("stream ended")
                .expect("websocket error");
            if let Message::Text(text) = msg {
                return text.as_str().to_string();
            }
        }
    }

    /// Asserts that no text message arrives within the quiet period.
    async fn assert_silent(&mut self) {
        if let Ok(Some(Ok(Message::Text(text)))) = timeout(QUIET_PERIOD, self.ws.next()).await {
            panic!("unexpected message for {}: {}", self.id, text.as_str());
        }
    }

    /// Waits for the server to close this connection.
    async fn expect_closed(&mut self) {
        let closed = timeout(WAIT_TIMEOUT, async {
            loop {
                match self.ws.next().await {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
                    Some(Ok(Message::Text(text))) => {
                        panic!("expected close, got text: {}", text.as_str())
                    }
                    Some(Ok(_)) => continue,
                }
            }
        })
        .await;
        assert!(closed.is_ok(), "server did not close {}", self.id);
    }

    async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

// ============================================================================
// Connection Lifecycle Tests
// ============================================================================

#[tokio::test]
async fn test_connect_registers_client() {
    let server = TestServer::spawn().await;

    let client = server.connect().await;

    assert_eq!(server.member_ids().await, vec![client.id]);
    server.shutdown();
}

#[tokio::test]
async fn test_clients_get_distinct_ids() {
    let server = TestServer::spawn().await;

    let a = server.connect().await;
    let b = server.connect().await;
    let c = server.connect().await;

    assert_ne!(a.id, b.id);
    assert_ne!(b.id, c.id);
    assert_ne!(a.id, c.id);
    server.wait_for_count(3).await;
    server.shutdown();
}

#[tokio::test]
async fn test_clean_close_unregisters() {
    let server = TestServer::spawn().await;
    let a = server.connect().await;
    let b = server.connect().await;
    let b_id = b.id;

    a.close().await;

    server.wait_for_count(1).await;
    assert_eq!(server.member_ids().await, vec![b_id]);
    server.shutdown();
}

#[tokio::test]
async fn test_abrupt_drop_unregisters() {
    let server = TestServer::spawn().await;
    let a = server.connect().await;

    // Drop the socket without a close handshake
    drop(a);

    server.wait_for_count(0).await;
    server.shutdown();
}

// ============================================================================
// Broadcast Tests
// ============================================================================

#[tokio::test]
async fn test_broadcast_includes_sender() {
    let server = TestServer::spawn().await;
    let mut a = server.connect().await;
    let mut b = server.connect().await;
    let mut c = server.connect().await;

    a.send("hello all").await;

    let expected = format!("hello all from {}", a.id);
    assert_eq!(a.recv().await, expected);
    assert_eq!(b.recv().await, expected);
    assert_eq!(c.recv().await, expected);
    server.shutdown();
}

#[tokio::test]
async fn test_chat_scenario() {
    let server = TestServer::spawn().await;
    let mut a = server.connect().await;
    let mut b = server.connect().await;
    let (a_id, b_id) = (a.id, b.id);

    a.send("hi").await;
    assert_eq!(a.recv().await, format!("hi from {a_id}"));
    assert_eq!(b.recv().await, format!("hi from {a_id}"));

    b.send("yo").await;
    assert_eq!(a.recv().await, format!("yo from {b_id}"));
    assert_eq!(b.recv().await, format!("yo from {b_id}"));

    a.close().await;
    server.wait_for_count(1).await;
    assert_eq!(server.member_ids().await, vec![b_id]);

    b.send("solo").await;
    assert_eq!(b.recv().await, format!("solo from {b_id}"));
    b.assert_silent().await;
    server.shutdown();
}

#[tokio::test]
async fn test_messages_from_one_sender_arrive_in_order() {
    let server = TestServer::spawn().await;
    let mut a = server.connect().await;
    let mut b = server.connect().await;

    for i in 0..50 {
        a.send(&format!("msg-{i}")).await;
    }

    for i in 0..50 {
        assert_eq!(b.recv().await, format!("msg-{i} from {}", a.id));
    }
    for i in 0..50 {
        assert_eq!(a.recv().await, format!("msg-{i} from {}", a.id));
    }
    server.shutdown();
}

#[tokio::test]
async fn test_late_joiner_gets_subsequent_messages() {
    let server = TestServer::spawn().await;
    let mut a = server.connect().await;

    a.send("before").await;
    assert_eq!(a.recv().await, format!("before from {}", a.id));

    let mut d = server.connect().await;
    a.send("after").await;

    assert_eq!(d.recv().await, format!("after from {}", a.id));
    assert_eq!(a.recv().await, format!("after from {}", a.id));
    server.shutdown();
}

#[tokio::test]
async fn test_dead_recipient_does_not_block_others() {
    let server = TestServer::spawn().await;
    let mut a = server.connect().await;
    let b = server.connect().await;
    let mut c = server.connect().await;

    // B vanishes; A broadcasts before or after the server notices
    drop(b);
    a.send("still here").await;

    let expected = format!("still here from {}", a.id);
    assert_eq!(a.recv().await, expected);
    assert_eq!(c.recv().await, expected);

    // A's own session keeps working
    a.send("again").await;
    assert_eq!(c.recv().await, format!("again from {}", a.id));
    server.wait_for_count(2).await;
    server.shutdown();
}

// ============================================================================
// Shutdown Tests
// ============================================================================

#[tokio::test]
async fn test_shutdown_closes_clients_and_drains_registry() {
    let server = TestServer::spawn().await;
    let mut a = server.connect().await;
    let mut b = server.connect().await;

    server.shutdown();

    a.expect_closed().await;
    b.expect_closed().await;
    server.wait_for_count(0).await;
}

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let server = TestServer::spawn().await;
    server.shutdown();
    sleep(Duration::from_millis(100)).await;

    let result = timeout(WAIT_TIMEOUT, connect_async(format!("ws://{}", server.addr))).await;
    assert!(matches!(result, Ok(Err(_))), "connection should be refused");
}
