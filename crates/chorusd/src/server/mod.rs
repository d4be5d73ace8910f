//! WebSocket server for chorus.
//!
//! The server:
//! - Listens on a TCP socket for client connections
//! - Assigns each connection an id and spawns a `Session` for it
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   ChatServer    │
//! │                 │
//! │  TcpListener    │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │     Session     │────▶│  RegistryHandle │
//! │   (per client)  │     │                 │
//! └───────┬─────────┘     └────────┬────────┘
//!         │ broadcast              │ snapshot
//!         ▼                        ▼
//! ┌─────────────────────────────────────────┐
//! │   ConnectionHandle queues → writers     │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! This module follows the project panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Server errors are logged and allow continued operation

mod broadcast;
mod peer;
mod session;

pub use broadcast::{broadcast, deliver, BroadcastReport};
pub use peer::{spawn_writer, ConnectionHandle, SendFault, WRITE_TIMEOUT};
pub use session::{Session, SessionError, SessionSettings};

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use chorus_core::ConnectionIdGenerator;

use crate::config::ServerConfig;
use crate::registry::RegistryHandle;

/// Time allowed for sessions to wind down after shutdown is requested
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// WebSocket server for chorus.
///
/// Accepts connections and runs one session per client.
pub struct ChatServer {
    /// Listen address and per-session limits
    config: ServerConfig,

    /// Handle to the connection registry
    registry: RegistryHandle,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Source of connection ids
    ids: ConnectionIdGenerator,

    /// Running session tasks
    sessions: TaskTracker,
}

impl ChatServer {
    /// Creates a new server.
    ///
    /// # Arguments
    ///
    /// * `config` - Listen address and limits
    /// * `registry` - Handle to the connection registry
    /// * `cancel_token` - Token for graceful shutdown
    pub fn new(
        config: ServerConfig,
        registry: RegistryHandle,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            config,
            registry,
            cancel_token,
            ids: ConnectionIdGenerator::new(),
            sessions: TaskTracker::new(),
        }
    }

    /// Binds the configured listen address.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr = self.config.listen_addr();
        TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr,
                error: e.to_string(),
            })
    }

    /// Binds and serves until the cancellation token is triggered.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serves connections on an already-bound listener.
    ///
    /// This method does not return until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let local = listener.local_addr().map_err(|e| ServerError::Bind {
            addr: self.config.listen_addr(),
            error: e.to_string(),
        })?;

        info!(addr = %local, "Server listening on ws://{local}");

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => self.handle_connection(stream, peer),
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                            // Continue accepting other connections
                        }
                    }
                }
            }
        }

        drop(listener);
        self.cleanup().await;
        Ok(())
    }

    /// Spawns a session task for a newly accepted connection.
    fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }

        let session = Session::new(
            self.ids.next_id(),
            peer,
            self.registry.clone(),
            SessionSettings::from(&self.config),
            self.cancel_token.child_token(),
        );

        self.sessions.spawn(async move {
            let id = session.id();
            match session.run(stream).await {
                Ok(_) => {}
                Err(SessionError::Cancelled) => {
                    debug!(client_id = %id, peer = %peer, "Handshake abandoned on shutdown");
                }
                Err(e) => {
                    warn!(client_id = %id, peer = %peer, error = %e, "Session ended before becoming active");
                }
            }
        });
    }

    /// Waits for running sessions to finish after shutdown.
    async fn cleanup(&self) {
        self.sessions.close();

        if tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, self.sessions.wait())
            .await
            .is_err()
        {
            warn!(
                remaining = self.sessions.len(),
                "Sessions still running after shutdown grace period"
            );
        }

        info!("Server cleanup complete");
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: String, error: String },
}
