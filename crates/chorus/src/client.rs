//! Server connection client for chorus.
//!
//! This module provides the `ChatClient` which handles:
//! - Connection to the server over WebSocket
//! - Automatic reconnection with exponential backoff
//! - Forwarding outgoing lines to the server and incoming broadcasts to the caller
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chorus_core::ConnectionId;

use crate::error::{ClientError, Result};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default server URL
pub const DEFAULT_URL: &str = "ws://127.0.0.1:8765";

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the chat client.
///
/// # Example
///
/// ```rust
/// use chorus_client::client::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig {
///     url: "ws://10.0.0.5:8765".to_string(),
///     retry_initial_delay: Duration::from_millis(500),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL of the server.
    pub url: String,

    /// Reconnect after the connection drops or cannot be established.
    pub reconnect: bool,

    /// Initial delay before first retry after connection failure.
    pub retry_initial_delay: Duration,

    /// Maximum delay between retry attempts.
    pub retry_max_delay: Duration,

    /// Multiplier for exponential backoff (e.g., 2.0 doubles delay each retry).
    pub retry_multiplier: f64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            reconnect: true,
            retry_initial_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(30),
            retry_multiplier: 2.0,
        }
    }
}

impl ClientConfig {
    /// Returns the delay to use after `current`, capped at the maximum.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let next_ms = (current.as_millis() as f64 * self.retry_multiplier) as u64;
        Duration::from_millis(next_ms).min(self.retry_max_delay)
    }
}

// ============================================================================
// Events
// ============================================================================

/// A broadcast line received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Incoming {
    /// The line exactly as received.
    pub raw: String,

    /// The payload with the sender suffix removed.
    pub body: String,

    /// Who sent it, when the line carries a recognisable sender tag.
    pub sender: Option<ConnectionId>,
}

impl Incoming {
    /// Splits a `"<body> from <sender>"` line.
    ///
    /// Lines without a parseable sender keep the whole text as the body.
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let split = raw
            .rsplit_once(" from ")
            .and_then(|(body, sender)| sender.parse().ok().map(|id| (body.to_string(), id)));

        match split {
            Some((body, sender)) => Self {
                raw,
                body,
                sender: Some(sender),
            },
            None => Self {
                body: raw.clone(),
                raw,
                sender: None,
            },
        }
    }
}

/// Events reported by the client to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A connection to the server was established.
    Connected,

    /// A broadcast message arrived.
    Message(Incoming),

    /// The connection ended.
    Disconnected {
        /// Human-readable cause.
        reason: String,
    },

    /// Waiting before the next connection attempt.
    Reconnecting {
        /// Delay before the attempt.
        delay: Duration,
    },
}

/// How a single connection ended.
enum SessionEnd {
    Cancelled,
    InputClosed,
    Lost(String),
}

// ============================================================================
// Chat Client
// ============================================================================

/// Client for talking to a chorus server.
///
/// Lines received on the outgoing channel are sent as text messages; every
/// broadcast the server delivers is reported as a [`ClientEvent::Message`].
///
/// # Example
///
/// ```rust,ignore
/// use chorus_client::{ChatClient, ClientConfig};
/// use tokio::sync::mpsc;
/// use tokio_util::sync::CancellationToken;
///
/// let (line_tx, line_rx) = mpsc::channel(32);
/// let (event_tx, mut event_rx) = mpsc::unbounded_channel();
/// let client = ChatClient::new(ClientConfig::default(), line_rx, event_tx, CancellationToken::new());
///
/// tokio::spawn(client.run());
/// line_tx.send("hello".to_string()).await?;
/// ```
pub struct ChatClient {
    /// Configuration for connection behavior.
    config: ClientConfig,

    /// Lines to send to the server.
    outgoing: mpsc::Receiver<String>,

    /// Channel to report events to the owner.
    events: mpsc::UnboundedSender<ClientEvent>,

    /// Cancellation token for graceful shutdown.
    cancel_token: CancellationToken,
}

impl ChatClient {
    /// Creates a new chat client.
    ///
    /// # Arguments
    ///
    /// * `config` - Configuration for connection behavior
    /// * `outgoing` - Lines to send; closing it ends the client
    /// * `events` - Channel to report events to
    /// * `cancel_token` - Token for signaling shutdown
    #[must_use]
    pub fn new(
        config: ClientConfig,
        outgoing: mpsc::Receiver<String>,
        events: mpsc::UnboundedSender<ClientEvent>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            config,
            outgoing,
            events,
            cancel_token,
        }
    }

    /// Runs the client until cancelled or the outgoing channel closes.
    ///
    /// # Errors
    ///
    /// With reconnection disabled, returns the first connect failure or
    /// disconnect. With reconnection enabled, only returns `Ok`.
    pub async fn run(mut self) -> Result<()> {
        info!(url = %self.config.url, "Chat client starting");
        let mut delay = self.config.retry_initial_delay;

        loop {
            if self.cancel_token.is_cancelled() {
                return Ok(());
            }

            match self.connect().await {
                Ok(ws) => {
                    info!(url = %self.config.url, "Connected to server");
                    delay = self.config.retry_initial_delay;
                    let _ = self.events.send(ClientEvent::Connected);

                    match self.session(ws).await {
                        SessionEnd::Cancelled => {
                            info!("Chat client shutting down (cancelled)");
                            return Ok(());
                        }
                        SessionEnd::InputClosed => {
                            info!("Input closed, disconnecting");
                            return Ok(());
                        }
                        SessionEnd::Lost(reason) => {
                            warn!(reason = %reason, "Connection lost");
                            let _ = self.events.send(ClientEvent::Disconnected {
                                reason: reason.clone(),
                            });
                            if !self.config.reconnect {
                                return Err(ClientError::Disconnected(reason));
                            }
                        }
                    }
                }
                Err(e) => {
                    if !self.config.reconnect {
                        return Err(e);
                    }
                    debug!(error = %e, "Connection attempt failed");
                }
            }

            let _ = self.events.send(ClientEvent::Reconnecting { delay });
            tokio::select! {
                _ = sleep(delay) => {
                    delay = self.config.next_delay(delay);
                }
                _ = self.cancel_token.cancelled() => {
                    info!("Connection retry cancelled");
                    return Ok(());
                }
            }
        }
    }

    async fn connect(&self) -> Result<Ws> {
        connect_async(self.config.url.as_str())
            .await
            .map(|(ws, _response)| ws)
            .map_err(|e| ClientError::Connect {
                url: self.config.url.clone(),
                reason: e.to_string(),
            })
    }

    /// Pumps one connection until it ends.
    async fn session(&mut self, ws: Ws) -> SessionEnd {
        let (mut sink, mut stream) = ws.split();
        let Self {
            outgoing,
            events,
            cancel_token,
            ..
        } = self;

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    let _ = sink.close().await;
                    return SessionEnd::Cancelled;
                }

                line = outgoing.recv() => match line {
                    Some(text) => {
                        if let Err(e) = sink.send(Message::text(text)).await {
                            return SessionEnd::Lost(e.to_string());
                        }
                    }
                    None => {
                        let _ = sink.close().await;
                        return SessionEnd::InputClosed;
                    }
                },

                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        let _ = events.send(ClientEvent::Message(Incoming::parse(text.as_str())));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.as_str().to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "closed by server".to_string());
                        return SessionEnd::Lost(reason);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return SessionEnd::Lost(e.to_string()),
                    None => return SessionEnd::Lost("connection closed".to_string()),
                },
            }
        }
    }
}
