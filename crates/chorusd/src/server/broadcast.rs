//! Fan-out of one message to every registered connection.

use tokio_tungstenite::tungstenite::Utf8Bytes;
use tracing::debug;

use chorus_core::{ChatMessage, ConnectionId};

use super::peer::{ConnectionHandle, SendFault};
use crate::registry::RegistryHandle;

/// Outcome of a single broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections in the snapshot
    pub recipients: usize,
    /// Connections the message was queued for
    pub delivered: usize,
    /// Recipients that could not take the message
    pub faults: Vec<(ConnectionId, SendFault)>,
}

impl BroadcastReport {
    pub fn is_complete(&self) -> bool {
        self.faults.is_empty()
    }
}

/// Broadcasts `message` to every connection registered right now,
/// the sender included.
///
/// Membership is copied out of the registry first; no registry state is
/// held while messages are handed to recipients.
pub async fn broadcast(registry: &RegistryHandle, message: &ChatMessage) -> BroadcastReport {
    let recipients = registry.snapshot().await;
    // Rendered once; every queue holds a view of the same buffer
    let text = Utf8Bytes::from(message.render());
    deliver(&recipients, &text)
}

/// Queues `text` for each recipient, continuing past individual faults.
pub fn deliver(recipients: &[ConnectionHandle], text: &Utf8Bytes) -> BroadcastReport {
    let mut report = BroadcastReport {
        recipients: recipients.len(),
        ..BroadcastReport::default()
    };

    for peer in recipients {
        match peer.send(text.clone()) {
            Ok(()) => report.delivered += 1,
            Err(fault) => {
                debug!(client_id = %peer.id(), fault = %fault, "Skipping recipient");
                report.faults.push((peer.id(), fault));
            }
        }
    }

    report
}
