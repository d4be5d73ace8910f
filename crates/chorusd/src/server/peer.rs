//! Per-connection send side.
//!
//! A [`ConnectionHandle`] is what the registry stores for each live
//! connection. Sending through it never touches the network: text is
//! pushed onto a bounded queue that a dedicated writer task drains into the
//! WebSocket sink. A slow or dead peer therefore only ever fills its own
//! queue; broadcasters move on immediately.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the project panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Queue and sink failures are reported as values, never panics

use std::net::SocketAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{Sink, SinkExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{Error as WsError, Message, Utf8Bytes};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use chorus_core::ConnectionId;

/// Write timeout for a single frame (10 seconds)
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Reference to one live connection, as held by the registry.
///
/// Cheap to clone; all clones feed the same outbound queue.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: SocketAddr,
    connected_at: DateTime<Utc>,
    outbound: mpsc::Sender<Utf8Bytes>,
}

impl ConnectionHandle {
    /// Creates a handle around an existing outbound queue.
    pub fn new(id: ConnectionId, peer: SocketAddr, outbound: mpsc::Sender<Utf8Bytes>) -> Self {
        Self {
            id,
            peer,
            connected_at: Utc::now(),
            outbound,
        }
    }

    /// Creates a handle together with the receiving end of its queue.
    ///
    /// `buffer` must be non-zero.
    pub fn channel(
        id: ConnectionId,
        peer: SocketAddr,
        buffer: usize,
    ) -> (Self, mpsc::Receiver<Utf8Bytes>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(id, peer, tx), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Queues `text` for delivery without waiting.
    ///
    /// # Errors
    ///
    /// - `SendFault::Closed` if the writer task has stopped
    /// - `SendFault::Backlogged` if the peer's queue is full
    pub fn send(&self, text: Utf8Bytes) -> Result<(), SendFault> {
        self.outbound.try_send(text).map_err(|e| match e {
            TrySendError::Full(_) => SendFault::Backlogged,
            TrySendError::Closed(_) => SendFault::Closed,
        })
    }

    /// Returns `true` once the writer side has gone away.
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

/// Failure to hand a message to one recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendFault {
    #[error("connection closed")]
    Closed,

    #[error("outbound queue full")]
    Backlogged,
}

/// Spawns the writer task for one connection.
///
/// The task drains `outbound` into `sink` until the queue closes, a write
/// fails, or `closing` is cancelled, then attempts a close frame.
pub fn spawn_writer<S>(
    id: ConnectionId,
    mut sink: S,
    mut outbound: mpsc::Receiver<Utf8Bytes>,
    closing: CancellationToken,
) -> JoinHandle<()>
where
    S: Sink<Message, Error = WsError> + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let text = tokio::select! {
                _ = closing.cancelled() => break,
                next = outbound.recv() => match next {
                    Some(text) => text,
                    None => break,
                },
            };

            match timeout(WRITE_TIMEOUT, sink.send(Message::Text(text))).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!(client_id = %id, error = %e, "Write failed, stopping writer");
                    break;
                }
                Err(_) => {
                    debug!(client_id = %id, "Write timed out, stopping writer");
                    break;
                }
            }
        }

        // Stop accepting before the close handshake so broadcasters see Closed
        outbound.close();
        let _ = timeout(WRITE_TIMEOUT, sink.close()).await;
        debug!(client_id = %id, "Writer stopped");
    })
}
