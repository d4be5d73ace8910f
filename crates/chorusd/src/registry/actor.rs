//! Registry actor - owns the live connection set and processes commands.
//!
//! The RegistryActor is the single owner of membership state in the server.
//! It receives commands via an mpsc channel and publishes events via broadcast.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the project panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Channel send failures are logged but don't panic

use std::collections::HashMap;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use chorus_core::ConnectionId;

use super::commands::{RegistryCommand, RegistryError, RegistryEvent, RemovalReason};
use crate::server::ConnectionHandle;

/// Default maximum number of connections the registry can hold.
pub const MAX_CONNECTIONS: usize = 1024;

// ============================================================================
// Registry Actor
// ============================================================================

/// The registry actor - owns all membership state.
///
/// Commands are processed one at a time, so every register, unregister and
/// snapshot observes a consistent set. Snapshots are copies: a broadcast
/// iterating one is unaffected by later joins and leaves.
pub struct RegistryActor {
    /// Command receiver
    receiver: mpsc::Receiver<RegistryCommand>,

    /// Live connections keyed by id
    connections: HashMap<ConnectionId, ConnectionHandle>,

    /// Capacity limit
    max_connections: usize,

    /// Membership event publisher
    event_publisher: broadcast::Sender<RegistryEvent>,
}

impl RegistryActor {
    /// Creates a new registry actor.
    ///
    /// # Arguments
    ///
    /// * `receiver` - Channel for receiving commands
    /// * `event_publisher` - Broadcast channel for publishing events
    /// * `max_connections` - Capacity limit
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        event_publisher: broadcast::Sender<RegistryEvent>,
        max_connections: usize,
    ) -> Self {
        Self {
            receiver,
            connections: HashMap::new(),
            max_connections,
            event_publisher,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all senders dropped).
    pub async fn run(mut self) {
        info!(max_connections = self.max_connections, "Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(
            connections = self.connections.len(),
            "Registry actor stopped"
        );
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Register {
                connection,
                respond_to,
            } => {
                let result = self.handle_register(connection);
                // Ignore send error - caller may have dropped the receiver
                let _ = respond_to.send(result);
            }
            RegistryCommand::Unregister {
                id,
                reason,
                respond_to,
            } => {
                let removed = self.handle_unregister(id, reason);
                if let Some(tx) = respond_to {
                    let _ = tx.send(removed);
                }
            }
            RegistryCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(self.handle_snapshot());
            }
            RegistryCommand::Contains { id, respond_to } => {
                let _ = respond_to.send(self.connections.contains_key(&id));
            }
            RegistryCommand::Count { respond_to } => {
                let _ = respond_to.send(self.connections.len());
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    fn handle_register(&mut self, connection: ConnectionHandle) -> Result<(), RegistryError> {
        let id = connection.id();

        if self.connections.contains_key(&id) {
            error!(client_id = %id, "Duplicate registry entry rejected");
            return Err(RegistryError::DuplicateEntry(id));
        }

        if self.connections.len() >= self.max_connections {
            warn!(
                client_id = %id,
                current = self.connections.len(),
                max = self.max_connections,
                "Registry is full, rejecting connection"
            );
            return Err(RegistryError::RegistryFull {
                max: self.max_connections,
            });
        }

        let peer = connection.peer();
        self.connections.insert(id, connection);

        debug!(
            client_id = %id,
            total_connections = self.connections.len(),
            "Connection registered"
        );

        // Publish event (ignore if no subscribers)
        let _ = self.event_publisher.send(RegistryEvent::Joined { id, peer });

        Ok(())
    }

    fn handle_unregister(&mut self, id: ConnectionId, reason: RemovalReason) -> bool {
        if self.connections.remove(&id).is_none() {
            debug!(client_id = %id, "Unregister for unknown connection ignored");
            return false;
        }

        debug!(
            client_id = %id,
            reason = %reason,
            total_connections = self.connections.len(),
            "Connection unregistered"
        );

        let _ = self.event_publisher.send(RegistryEvent::Left { id, reason });

        true
    }

    /// Copies the membership, ordered by id so broadcast order is stable.
    fn handle_snapshot(&self) -> Vec<ConnectionHandle> {
        let mut snapshot: Vec<ConnectionHandle> = self.connections.values().cloned().collect();
        snapshot.sort_by_key(ConnectionHandle::id);
        snapshot
    }

    /// Returns the number of registered connections (for testing).
    #[cfg(test)]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}
