//! Robustness tests for the server.
//!
//! These tests verify the server handles edge cases and error conditions gracefully:
//! - Failed handshakes
//! - Capacity limits
//! - Rapid connect/disconnect churn
//! - Non-text frames and oversized messages
//! - Idle timeouts
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use chorusd::config::ServerConfig;
use chorusd::registry::{spawn_registry_with_capacity, RegistryHandle};
use chorusd::server::ChatServer;
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

const WAIT_TIMEOUT: Duration = Duration::from_secs(3);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Test Helpers
// ============================================================================

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    registry: RegistryHandle,
    cancel_token: CancellationToken,
}

impl TestServer {
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

    async fn spawn() -> Self {
        Self::spawn_with(ServerConfig::default()).await
    }

    async fn connect(&self) -> Ws {
        let (ws, _) = connect_async(format!("ws://{}", self.addr))
            .await
            .expect("connect to server");
        ws
    }

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
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

async fn recv_text(ws: &mut Ws) -> String {
    loop {
        let msg = timeout(WAIT_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for message")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return text.as_str().to_string();
        }
    }
}

// ============================================================================
// Handshake Tests
// ============================================================================

#[tokio::test]
async fn test_garbage_handshake_does_not_register() {
    let server = TestServer::spawn().await;

    let mut raw = TcpStream::connect(server.addr).await.unwrap();
    raw.write_all(b"NOT A WEBSOCKET\r\n\r\n").await.unwrap();
    raw.flush().await.unwrap();
    sleep(Duration::from_millis(100)).await;

    assert_eq!(server.registry.connection_count().await, 0);

    // The server keeps serving real clients
    let mut ws = server.connect().await;
    server.wait_for_count(1).await;
    ws.send(Message::text("alive")).await.unwrap();
    assert!(recv_text(&mut ws).await.starts_with("alive from client-"));
}

#[tokio::test]
async fn test_handshake_timeout_releases_socket() {
    let config = ServerConfig {
        handshake_timeout_secs: 1,
        ..ServerConfig::default()
    };
    let server = TestServer::spawn_with(config).await;

    // Connect but never speak
    let mut raw = TcpStream::connect(server.addr).await.unwrap();

    let mut buf = [0u8; 16];
    let read = timeout(WAIT_TIMEOUT, tokio::io::AsyncReadExt::read(&mut raw, &mut buf))
        .await
        .expect("server should hang up");
    assert!(matches!(read, Ok(0) | Err(_)));
    assert_eq!(server.registry.connection_count().await, 0);
}

// ============================================================================
// Capacity Tests
// ============================================================================

#[tokio::test]
async fn test_full_registry_rejects_with_policy_close() {
    let config = ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    };
    let server = TestServer::spawn_with(config).await;

    let _first = server.connect().await;
    server.wait_for_count(1).await;

    let mut second = server.connect().await;
    let frame = timeout(WAIT_TIMEOUT, second.next())
        .await
        .expect("close frame")
        .expect("stream item")
        .expect("websocket message");

    match frame {
        Message::Close(Some(close)) => assert_eq!(close.code, CloseCode::Policy),
        other => panic!("expected policy close, got {other:?}"),
    }
    assert_eq!(server.registry.connection_count().await, 1);
}

// ============================================================================
// Churn Tests
// ============================================================================

#[tokio::test]
async fn test_rapid_connect_disconnect_leaves_no_entries() {
    let server = TestServer::spawn().await;

    for _ in 0..25 {
        let mut ws = server.connect().await;
        let _ = ws.close(None).await;
    }
    for _ in 0..25 {
        drop(server.connect().await);
    }

    server.wait_for_count(0).await;
}

#[tokio::test]
async fn test_membership_matches_open_connections() {
    let server = TestServer::spawn().await;

    let mut open = Vec::new();
    for _ in 0..12 {
        open.push(server.connect().await);
    }
    server.wait_for_count(12).await;

    // Close every third connection
    let mut kept = Vec::new();
    for (i, mut ws) in open.into_iter().enumerate() {
        if i % 3 == 0 {
            let _ = ws.close(None).await;
        } else {
            kept.push(ws);
        }
    }
    server.wait_for_count(8).await;

    // Every survivor still receives broadcasts from the others
    let first = kept.first_mut().unwrap();
    first.send(Message::text("roll call")).await.unwrap();

    let mut senders = HashSet::new();
    for ws in kept.iter_mut() {
        let text = recv_text(ws).await;
        let (body, sender) = text.rsplit_once(" from ").unwrap();
        assert_eq!(body, "roll call");
        senders.insert(sender.to_string());
    }
    assert_eq!(senders.len(), 1);
}

#[tokio::test]
async fn test_concurrent_clients_all_register_and_leave() {
    let server = TestServer::spawn().await;
    let addr = server.addr;

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            tokio::spawn(async move {
                let (mut ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();
                ws.send(Message::text(format!("from task {i}"))).await.unwrap();
                sleep(Duration::from_millis(50)).await;
                let _ = ws.close(None).await;
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }

    server.wait_for_count(0).await;
}

// ============================================================================
// Frame Handling Tests
// ============================================================================

#[tokio::test]
async fn test_binary_frames_are_ignored() {
    let server = TestServer::spawn().await;
    let mut ws = server.connect().await;
    server.wait_for_count(1).await;

    ws.send(Message::binary(vec![0u8, 1, 2, 3])).await.unwrap();
    ws.send(Message::text("text wins")).await.unwrap();

    assert!(recv_text(&mut ws).await.starts_with("text wins from "));
}

#[tokio::test]
async fn test_oversized_message_dropped_connection_kept() {
    let config = ServerConfig {
        max_message_size: 8,
        ..ServerConfig::default()
    };
    let server = TestServer::spawn_with(config).await;
    let mut ws = server.connect().await;
    server.wait_for_count(1).await;

    ws.send(Message::text("this is far too long")).await.unwrap();
    ws.send(Message::text("short")).await.unwrap();

    assert!(recv_text(&mut ws).await.starts_with("short from "));
    assert_eq!(server.registry.connection_count().await, 1);
}

#[tokio::test]
async fn test_idle_connection_is_closed() {
    let config = ServerConfig {
        idle_timeout_secs: Some(1),
        ..ServerConfig::default()
    };
    let server = TestServer::spawn_with(config).await;
    let _ws = server.connect().await;
    server.wait_for_count(1).await;

    server.wait_for_count(0).await;
}
