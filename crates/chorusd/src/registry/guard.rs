//! Scoped registry membership.
//!
//! A [`RegistrationGuard`] is created once a connection has been
//! registered. The session releases it explicitly with the reason it is
//! closing; if the session is torn down any other way (an early return or
//! a panic unwinding through the task) the guard's `Drop` removes the entry
//! instead. Either way the removal is issued exactly once.

use tracing::warn;

use chorus_core::ConnectionId;

use super::commands::RemovalReason;
use super::handle::RegistryHandle;

/// Keeps a connection registered until released or dropped.
#[must_use = "dropping the guard unregisters the connection immediately"]
pub struct RegistrationGuard {
    registry: RegistryHandle,
    id: ConnectionId,
    released: bool,
}

impl RegistrationGuard {
    /// Wraps an id that has already been registered.
    pub fn new(registry: RegistryHandle, id: ConnectionId) -> Self {
        Self {
            registry,
            id,
            released: false,
        }
    }

    /// Removes the entry and waits for the registry to confirm.
    ///
    /// Returns whether an entry was actually removed.
    pub async fn release(mut self, reason: RemovalReason) -> bool {
        self.released = true;
        self.registry.unregister(self.id, reason).await
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        warn!(client_id = %self.id, "Session ended without releasing registration");
        self.registry
            .unregister_detached(self.id, RemovalReason::Aborted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{spawn_registry, RegistryEvent};
    use crate::server::ConnectionHandle;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::time::timeout;

    fn addr() -> SocketAddr {
        "127.0.0.1:4200".parse().unwrap()
    }

    async fn registered(registry: &RegistryHandle, n: u64) -> RegistrationGuard {
        let (conn, _rx) = ConnectionHandle::channel(ConnectionId::new(n), addr(), 4);
        registry.register(conn).await.unwrap();
        RegistrationGuard::new(registry.clone(), ConnectionId::new(n))
    }

    #[tokio::test]
    async fn test_release_removes_entry_once() {
        let registry = spawn_registry();
        let mut events = registry.subscribe();
        let guard = registered(&registry, 1).await;
        let _ = events.recv().await;

        assert!(guard.release(RemovalReason::PeerClosed).await);
        assert_eq!(registry.connection_count().await, 0);

        assert_eq!(
            events.recv().await.unwrap(),
            RegistryEvent::Left {
                id: ConnectionId::new(1),
                reason: RemovalReason::PeerClosed,
            }
        );
        // Dropping the released guard must not emit a second removal
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_drop_removes_entry() {
        let registry = spawn_registry();
        let mut events = registry.subscribe();
        let guard = registered(&registry, 2).await;
        let _ = events.recv().await;

        drop(guard);

        let event = timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("Left event")
            .unwrap();
        assert_eq!(
            event,
            RegistryEvent::Left {
                id: ConnectionId::new(2),
                reason: RemovalReason::Aborted,
            }
        );
        assert!(!registry.contains(ConnectionId::new(2)).await);
    }

    #[tokio::test]
    async fn test_panicking_task_still_unregisters() {
        let registry = spawn_registry();
        let guard = registered(&registry, 3).await;

        let task = tokio::spawn(async move {
            let _guard = guard;
            panic!("session blew up");
        });
        assert!(task.await.is_err());

        // Detached removal is queued behind nothing else; the next query observes it
        assert_eq!(registry.connection_count().await, 0);
    }
}
