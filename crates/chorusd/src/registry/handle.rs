//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` provides a cheap-to-clone interface for sending commands
//! to the registry actor and subscribing to membership events.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the project panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Channel errors are mapped to `RegistryError::ChannelClosed`

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::warn;

use chorus_core::ConnectionId;

use super::commands::{RegistryCommand, RegistryError, RegistryEvent, RemovalReason};
use crate::server::ConnectionHandle;

// ============================================================================
// Registry Handle
// ============================================================================

/// Handle for interacting with the registry actor.
///
/// This is a cheap-to-clone handle that can be shared across tasks.
///
/// # Usage
///
/// ```ignore
/// let handle = registry_handle.clone();
///
/// handle.register(connection).await?;
///
/// for peer in handle.snapshot().await {
///     let _ = peer.send(text.clone());
/// }
///
/// handle.unregister(id, RemovalReason::PeerClosed).await;
/// ```
#[derive(Clone)]
pub struct RegistryHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<RegistryCommand>,

    /// Event broadcaster for subscribing to membership changes
    event_sender: broadcast::Sender<RegistryEvent>,
}

impl RegistryHandle {
    /// Create a new registry handle.
    pub fn new(
        sender: mpsc::Sender<RegistryCommand>,
        event_sender: broadcast::Sender<RegistryEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Add a connection to the live set.
    ///
    /// # Errors
    ///
    /// - `RegistryError::DuplicateEntry` if the id is already registered
    /// - `RegistryError::RegistryFull` if the registry is at capacity
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn register(&self, connection: ConnectionHandle) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Register {
                connection,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Remove a connection from the live set.
    ///
    /// Returns `true` if an entry was removed. Removing an absent id, or
    /// calling this after the actor has stopped, returns `false`.
    pub async fn unregister(&self, id: ConnectionId, reason: RemovalReason) -> bool {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Unregister {
                id,
                reason,
                respond_to: Some(tx),
            })
            .await
            .is_err()
        {
            return false;
        }

        rx.await.unwrap_or(false)
    }

    /// Remove a connection without waiting.
    ///
    /// Usable from `Drop`. If the command queue is momentarily full the
    /// removal is handed to a spawned task instead of being lost.
    pub fn unregister_detached(&self, id: ConnectionId, reason: RemovalReason) {
        let cmd = RegistryCommand::Unregister {
            id,
            reason,
            respond_to: None,
        };

        match self.sender.try_send(cmd) {
            Ok(()) => {}
            Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(cmd)) => match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    let sender = self.sender.clone();
                    runtime.spawn(async move {
                        let _ = sender.send(cmd).await;
                    });
                }
                Err(_) => {
                    warn!(client_id = %id, "No runtime available, registry entry leaked");
                }
            },
        }
    }

    /// Copy out the current membership.
    ///
    /// The returned vector is independent of the registry: later joins and
    /// leaves do not change it. Returns an empty vector if the actor has
    /// shut down.
    pub async fn snapshot(&self) -> Vec<ConnectionHandle> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Snapshot { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Check whether an id is currently registered.
    pub async fn contains(&self, id: ConnectionId) -> bool {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Contains { id, respond_to: tx })
            .await
            .is_err()
        {
            return false;
        }

        rx.await.unwrap_or(false)
    }

    /// Number of registered connections (0 if the actor has shut down).
    pub async fn connection_count(&self) -> usize {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Count { respond_to: tx })
            .await
            .is_err()
        {
            return 0;
        }

        rx.await.unwrap_or(0)
    }

    /// Subscribe to membership events.
    ///
    /// This is a synchronous operation - it doesn't communicate with the actor.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_sender.subscribe()
    }

    /// Check if the actor is still running.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}
