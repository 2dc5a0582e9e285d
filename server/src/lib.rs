//! # Plaza Server Library
//!
//! This library provides the authoritative server for the penguin plaza. It owns
//! the canonical record of every penguin in the space, accepts join, move and
//! emoji messages from connected clients, and fans the resulting changes out to
//! everyone else.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Registry
//! The server holds the only trusted copy of player state. Clients report where
//! their penguin is; the server records it and relays it, but a client's view of
//! other penguins is always built from what the server sends.
//!
//! ### Connection Lifecycle
//! Each WebSocket connection moves through two phases:
//! - **Connected**: the socket is open and has been told its id, but no penguin exists yet
//! - **Active**: a `join` was received and the penguin is in the registry
//!
//! Closing the socket in either phase removes the connection. Only active
//! connections produce a `player-left` broadcast.
//!
//! ### Fan-out
//! - `state-snapshot` goes only to the joiner and lists everyone else
//! - `player-joined` and `player-moved` go to everyone except the sender
//! - `player-emoji` and `player-left` go to everyone
//!
//! ## Architecture Design
//!
//! ### Single-Owner Event Loop
//! Connection tasks never touch shared state. They forward decoded text frames
//! to one dispatch loop over a channel, and that loop owns the
//! [`sync::SyncServer`] outright. Every handler runs to completion before the
//! next event is taken, so no two handlers ever interleave and no locks are
//! needed.
//!
//! ### Per-Connection Outbox
//! Each connection has an unbounded outbound queue drained by its own writer
//! task. A send that fails because the writer is gone is treated exactly like a
//! disconnect.
//!
//! ## Module Organization
//!
//! ### Registry Module (`registry`)
//! The keyed store of [`shared::PlayerState`] records, spawn placement and
//! join-order snapshots.
//!
//! ### Sync Module (`sync`)
//! Connection phases and the handlers for every client message, including the
//! routing rules above.
//!
//! ### Network Module (`network`)
//! The WebSocket listener, per-connection reader and writer tasks, and the
//! dispatch loop that feeds the sync module.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         bind_addr: "127.0.0.1:3000".to_string(),
//!         ..ServerConfig::default()
//!     };
//!
//!     let server = Server::new(&config).await?;
//!     server.run_until(tokio::signal::ctrl_c()).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod network;
pub mod registry;
pub mod sync;
