//! Chorus Client - connect to a chorus server and exchange broadcast messages
//!
//! Every line handed to the client is sent to the server as a text message,
//! and every broadcast the server delivers comes back as a [`ClientEvent`].
//! Lost connections are retried with exponential backoff.

pub mod client;
pub mod error;

pub use client::{ChatClient, ClientConfig, ClientEvent, Incoming, DEFAULT_URL};
pub use error::{ClientError, Result};
