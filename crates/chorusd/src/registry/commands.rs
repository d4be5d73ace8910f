//! Registry actor commands, errors, and events.
//!
//! This module defines the message types for communicating with the `RegistryActor`:
//! - `RegistryCommand`: Commands sent to the actor
//! - `RegistryError`: Errors that can occur during registry operations
//! - `RegistryEvent`: Membership events published by the registry for subscribers
//!
//! All types are designed for async message passing and follow the panic-free policy.

use std::net::SocketAddr;

use chorus_core::ConnectionId;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::server::ConnectionHandle;

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Request-style commands carry a oneshot channel for the response.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Add a connection to the live set.
    ///
    /// # Errors
    /// - `RegistryError::DuplicateEntry` if the id is already registered
    /// - `RegistryError::RegistryFull` if at maximum capacity
    Register {
        /// Handle to store
        connection: ConnectionHandle,
        /// Channel to send the result
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Remove a connection from the live set.
    ///
    /// Removing an absent id is not an error; the response is `false`.
    /// `respond_to` is `None` for fire-and-forget removals issued from
    /// drop paths that cannot wait.
    Unregister {
        /// ID of the connection to remove
        id: ConnectionId,
        /// Why the connection is leaving
        reason: RemovalReason,
        /// Channel to send whether an entry was removed
        respond_to: Option<oneshot::Sender<bool>>,
    },

    /// Copy out the current membership for broadcasting.
    Snapshot {
        /// Channel to send the copy
        respond_to: oneshot::Sender<Vec<ConnectionHandle>>,
    },

    /// Check whether an id is currently registered.
    Contains {
        /// ID to look up
        id: ConnectionId,
        /// Channel to send the result
        respond_to: oneshot::Sender<bool>,
    },

    /// Get the number of registered connections.
    Count {
        /// Channel to send the result
        respond_to: oneshot::Sender<usize>,
    },
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A connection with this id is already registered.
    ///
    /// Ids come from a monotonic counter, so this signals a broken invariant.
    #[error("duplicate registry entry: {0}")]
    DuplicateEntry(ConnectionId),

    /// The registry has reached its maximum connection capacity.
    #[error("registry is full (max: {max} connections)")]
    RegistryFull {
        /// Maximum number of connections allowed
        max: usize,
    },

    /// The response channel was closed before receiving a response.
    ///
    /// This typically indicates the actor was shut down.
    #[error("response channel closed")]
    ChannelClosed,
}

// ============================================================================
// Registry Events
// ============================================================================

/// Membership events published by the registry to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A connection was registered.
    Joined {
        /// ID of the new connection
        id: ConnectionId,
        /// Remote address of the peer
        peer: SocketAddr,
    },

    /// A connection was removed.
    Left {
        /// ID of the removed connection
        id: ConnectionId,
        /// Why it was removed
        reason: RemovalReason,
    },
}

/// Reason why a connection left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Peer sent a close frame or the stream ended.
    PeerClosed,

    /// Receiving failed with an error other than a clean close.
    TransportError,

    /// No frame arrived within the configured idle timeout.
    IdleTimeout,

    /// The server is shutting down.
    Shutdown,

    /// The session task ended without releasing its registration
    /// (for example, it panicked).
    Aborted,
}

impl std::fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PeerClosed => write!(f, "closed by peer"),
            Self::TransportError => write!(f, "transport error"),
            Self::IdleTimeout => write!(f, "idle timeout"),
            Self::Shutdown => write!(f, "server shutdown"),
            Self::Aborted => write!(f, "session aborted"),
        }
    }
}
