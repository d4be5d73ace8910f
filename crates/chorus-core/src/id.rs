//! Connection identity.
//!
//! Every accepted connection gets a [`ConnectionId`] drawn from a
//! process-wide counter. The id is used to tag outbound messages and to
//! key the server's registry; it carries no authentication meaning.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::DomainError;

/// Prefix used when rendering a connection id for display.
pub const CONNECTION_ID_PREFIX: &str = "client-";

/// Identity of a single live connection.
///
/// Displays as `client-<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a connection id from a raw number.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric value.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{CONNECTION_ID_PREFIX}{}", self.0)
    }
}

impl FromStr for ConnectionId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix(CONNECTION_ID_PREFIX)
            .and_then(|n| n.parse().ok())
            .map(Self)
            .ok_or_else(|| DomainError::InvalidConnectionId {
                value: s.to_string(),
            })
    }
}

/// Hands out unique connection ids.
///
/// Ids are never reused within the lifetime of a generator, so two
/// connections alive at the same time can never share one.
#[derive(Debug, Default)]
pub struct ConnectionIdGenerator {
    next: AtomicU64,
}

impl ConnectionIdGenerator {
    /// Creates a generator starting at zero.
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    /// Returns the next unused id.
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}
