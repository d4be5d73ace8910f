//! Connection registry using Actor pattern.
//!
//! The registry is the authoritative set of live connections. It receives
//! commands via a tokio mpsc channel; because the actor handles one command
//! at a time, joins, leaves and snapshots never interleave.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │  Session Loops  │────▶│  RegistryActor  │────▶│ Broadcast Channel│
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//!         │                       │                       │
//!         │   RegistryCommand     │   RegistryEvent       │
//!         │   (mpsc channel)      │   (broadcast)         │
//!         ▼                       ▼                       ▼
//!    Register/Unregister     HashMap<ConnectionId,   Joined/Left
//!    Snapshot               ConnectionHandle>        observers
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use tokio::sync::{broadcast, mpsc};

mod actor;
mod commands;
mod guard;
mod handle;

pub use actor::{RegistryActor, MAX_CONNECTIONS};
pub use commands::{RegistryCommand, RegistryError, RegistryEvent, RemovalReason};
pub use guard::RegistrationGuard;
pub use handle::RegistryHandle;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 256;
const EVENT_BUFFER: usize = 256;

/// Spawn the registry actor with the default capacity.
///
/// # Example
///
/// ```no_run
/// use chorusd::registry::spawn_registry;
///
/// #[tokio::main]
/// async fn main() {
///     let handle = spawn_registry();
///     let live = handle.connection_count().await;
/// }
/// ```
pub fn spawn_registry() -> RegistryHandle {
    spawn_registry_with_capacity(MAX_CONNECTIONS)
}

/// Spawn the registry actor and return a handle for interaction.
///
/// The actor runs until every handle has been dropped.
pub fn spawn_registry_with_capacity(max_connections: usize) -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = RegistryActor::new(cmd_rx, event_tx.clone(), max_connections);
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx, event_tx)
}
