//! Chat message type.
//!
//! A message only exists while it is being broadcast. It pairs the text a
//! client sent with the sender's id and renders both into the single
//! outbound line every recipient sees: `"<text> from <sender>"`.

use std::fmt;

use crate::error::{DomainError, DomainResult};
use crate::id::ConnectionId;

/// Default maximum inbound message size (1 MB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1_048_576;

/// An inbound text message tagged with its sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    text: String,
    sender: ConnectionId,
}

impl ChatMessage {
    /// Creates a message, rejecting payloads larger than `max_size` bytes.
    pub fn new(text: impl Into<String>, sender: ConnectionId, max_size: usize) -> DomainResult<Self> {
        let text = text.into();
        if text.len() > max_size {
            return Err(DomainError::MessageTooLarge {
                size: text.len(),
                max: max_size,
            });
        }
        Ok(Self { text, sender })
    }

    /// The raw payload as sent by the client.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The id of the connection that sent this message.
    pub fn sender(&self) -> ConnectionId {
        self.sender
    }

    /// Renders the outbound line.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {}", self.text, self.sender)
    }
}
