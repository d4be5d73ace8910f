//! Session loop for individual client connections.
//!
//! Each accepted connection gets its own `Session` that:
//! - Performs the WebSocket handshake
//! - Registers the connection in the registry
//! - Reads text messages and broadcasts them to every registered connection
//! - Unregisters on close, error, idle timeout or shutdown
//!
//! # Lifecycle
//!
//! ```text
//! Connecting ──handshake──▶ Active ──close / error / idle / shutdown──▶ Closing ──▶ Terminated
//!                             │ ▲
//!                             └─┘ text message → broadcast
//! ```
//!
//! # Panic-Free Guarantees
//!
//! This module follows the project panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Connection errors are logged and result in graceful disconnect

use std::net::SocketAddr;
use std::time::Duration;

use chrono::Utc;
use futures::{SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{error::Elapsed, timeout};
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use chorus_core::{ChatMessage, ConnectionId};

use super::broadcast::broadcast;
use super::peer::{spawn_writer, ConnectionHandle, WRITE_TIMEOUT};
use crate::config::ServerConfig;
use crate::registry::{RegistrationGuard, RegistryError, RegistryHandle, RemovalReason};

/// Per-session limits derived from [`ServerConfig`].
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub outbound_buffer: usize,
    pub max_message_size: usize,
    pub idle_timeout: Option<Duration>,
    pub handshake_timeout: Duration,
}

impl From<&ServerConfig> for SessionSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            outbound_buffer: config.outbound_buffer.max(1),
            max_message_size: config.max_message_size,
            idle_timeout: config.idle_timeout(),
            handshake_timeout: config.handshake_timeout(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

/// Session loop for a single client connection.
pub struct Session {
    /// Identity assigned at accept time
    id: ConnectionId,

    /// Remote address
    peer: SocketAddr,

    /// Handle to the connection registry
    registry: RegistryHandle,

    /// Limits and timeouts
    settings: SessionSettings,

    /// Cancelled when the server shuts down
    cancel_token: CancellationToken,
}

impl Session {
    /// Creates a new session.
    ///
    /// # Arguments
    ///
    /// * `id` - Identity for this connection
    /// * `peer` - Remote address of the client
    /// * `registry` - Handle to the connection registry
    /// * `settings` - Limits and timeouts
    /// * `cancel_token` - Token that ends the session on server shutdown
    pub fn new(
        id: ConnectionId,
        peer: SocketAddr,
        registry: RegistryHandle,
        settings: SessionSettings,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            id,
            peer,
            registry,
            settings,
            cancel_token,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Runs the session to completion.
    ///
    /// Returns why the connection ended once it has been unregistered.
    /// Errors are returned only for sessions that never became active.
    pub async fn run<S>(self, stream: S) -> Result<RemovalReason, SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        debug!(client_id = %self.id, peer = %self.peer, "New connection accepted");

        // Connecting
        let handshake = timeout(
            self.settings.handshake_timeout,
            tokio_tungstenite::accept_async(stream),
        );
        let ws = tokio::select! {
            _ = self.cancel_token.cancelled() => return Err(SessionError::Cancelled),
            result = handshake => match result {
                Ok(Ok(ws)) => ws,
                Ok(Err(e)) => return Err(SessionError::Handshake(e.to_string())),
                Err(_) => return Err(SessionError::HandshakeTimeout),
            },
        };

        let (mut sink, mut source) = ws.split();
        let (handle, outbound) =
            ConnectionHandle::channel(self.id, self.peer, self.settings.outbound_buffer);
        let connected_at = handle.connected_at();

        if let Err(e) = self.registry.register(handle).await {
            match &e {
                RegistryError::DuplicateEntry(_) => {
                    error!(client_id = %self.id, error = %e, "Connection id invariant violated");
                }
                _ => warn!(client_id = %self.id, error = %e, "Rejecting connection"),
            }
            let close = Message::Close(Some(CloseFrame {
                code: CloseCode::Policy,
                reason: e.to_string().into(),
            }));
            let _ = timeout(WRITE_TIMEOUT, sink.send(close)).await;
            return Err(SessionError::Registry(e));
        }

        // Active
        let guard = RegistrationGuard::new(self.registry.clone(), self.id);
        let closing = CancellationToken::new();
        let writer = spawn_writer(self.id, sink, outbound, closing.clone());
        let stop_writer = closing.drop_guard();

        info!(client_id = %self.id, peer = %self.peer, "Client connected");

        let reason = self.read_loop(&mut source).await;

        // Closing
        guard.release(reason).await;
        drop(stop_writer);
        let _ = timeout(WRITE_TIMEOUT, writer).await;

        let duration_secs = (Utc::now() - connected_at).num_seconds();
        info!(
            client_id = %self.id,
            reason = %reason,
            duration_secs,
            "Client disconnected"
        );
        Ok(reason)
    }

    /// Reads frames until the connection should close.
    async fn read_loop<R>(&self, source: &mut R) -> RemovalReason
    where
        R: Stream<Item = Result<Message, WsError>> + Unpin,
    {
        loop {
            let next = tokio::select! {
                _ = self.cancel_token.cancelled() => return RemovalReason::Shutdown,
                next = self.next_frame(source) => next,
            };

            let frame = match next {
                Ok(Some(Ok(frame))) => frame,
                Ok(Some(Err(e))) => return self.classify_error(e),
                Ok(None) => {
                    debug!(client_id = %self.id, "Stream ended");
                    return RemovalReason::PeerClosed;
                }
                Err(_) => {
                    debug!(client_id = %self.id, "Connection idle, closing");
                    return RemovalReason::IdleTimeout;
                }
            };

            match frame {
                Message::Text(text) => self.handle_text(text.as_str()).await,
                Message::Close(frame) => {
                    debug!(client_id = %self.id, frame = ?frame, "Client sent close");
                    return RemovalReason::PeerClosed;
                }
                Message::Binary(data) => {
                    debug!(client_id = %self.id, bytes = data.len(), "Ignoring binary frame");
                }
                // Ping/pong replies are handled by the transport
                _ => {}
            }
        }
    }

    async fn next_frame<R>(
        &self,
        source: &mut R,
    ) -> Result<Option<Result<Message, WsError>>, Elapsed>
    where
        R: Stream<Item = Result<Message, WsError>> + Unpin,
    {
        match self.settings.idle_timeout {
            Some(idle) => timeout(idle, source.next()).await,
            None => Ok(source.next().await),
        }
    }

    /// Formats and broadcasts one inbound text message.
    async fn handle_text(&self, text: &str) {
        let message = match ChatMessage::new(text, self.id, self.settings.max_message_size) {
            Ok(message) => message,
            Err(e) => {
                warn!(client_id = %self.id, error = %e, "Dropping message");
                return;
            }
        };

        info!(client_id = %self.id, message = %message, "Message received");

        let report = broadcast(&self.registry, &message).await;
        debug!(
            client_id = %self.id,
            recipients = report.recipients,
            delivered = report.delivered,
            faults = report.faults.len(),
            "Broadcast complete"
        );
    }

    fn classify_error(&self, error: WsError) -> RemovalReason {
        match error {
            WsError::ConnectionClosed
            | WsError::AlreadyClosed
            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                debug!(client_id = %self.id, "Connection lost");
                RemovalReason::PeerClosed
            }
            other => {
                debug!(client_id = %self.id, error = %other, "Receive failed");
                RemovalReason::TransportError
            }
        }
    }
}

/// Errors that end a session before it becomes active.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),

    #[error("WebSocket handshake timed out")]
    HandshakeTimeout,

    #[error("Server shut down during handshake")]
    Cancelled,

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}
