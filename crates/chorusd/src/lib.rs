//! chorus server - Connection registry and broadcast loop
//!
//! This crate provides the core infrastructure for the chorus server:
//! - `registry` - Connection registry actor tracking live connections
//! - `server` - WebSocket accept loop, per-connection sessions and fan-out
//! - `config` - Layered server configuration
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        chorusd                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │   ChatServer    │────▶│     RegistryActor           │   │
//! │  │ (TcpListener)   │     │  (connection set owner)     │   │
//! │  └────────┬────────┘     └──────────────┬──────────────┘   │
//! │           │                             │                   │
//! │           │ connections                 │ snapshots         │
//! │           ▼                             ▼                   │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │    Session      │────▶│   ConnectionHandle queues   │   │
//! │  │  (per client)   │     │   (per-peer writer tasks)   │   │
//! │  └─────────────────┘     └─────────────────────────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the project panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod registry;
pub mod server;
