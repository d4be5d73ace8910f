//! Error types for the chorus client.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use thiserror::Error;

/// Client errors.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Failed to reach the server.
    #[error("Failed to connect to {url}: {reason}")]
    Connect {
        /// Server URL that was dialled.
        url: String,
        /// Underlying failure.
        reason: String,
    },

    /// The connection dropped and reconnecting is disabled.
    #[error("Disconnected from server: {0}")]
    Disconnected(String),
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
