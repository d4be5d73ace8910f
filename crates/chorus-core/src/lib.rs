//! chorus core - Shared types for the chorus broadcaster
//!
//! This crate provides the domain types shared between
//! the server (chorusd) and the client (chorus).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod id;
pub mod message;

// Re-exports for convenience
pub use error::{DomainError, DomainResult};
pub use id::{ConnectionId, ConnectionIdGenerator, CONNECTION_ID_PREFIX};
pub use message::{ChatMessage, DEFAULT_MAX_MESSAGE_SIZE};
