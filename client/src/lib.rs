//! # Plaza Client Library
//!
//! This library provides the client side of the penguin plaza: a mirror of
//! every other penguin kept current by the server, and the local penguin whose
//! movement is applied immediately and reported to the server.
//!
//! ## Trust Model
//!
//! The client is authoritative for its own penguin and the server is
//! authoritative for everyone else. Local movement never waits for an
//! acknowledgment, and the server never echoes a client's own moves back to
//! it. Remote penguins are only ever changed by server events.
//!
//! ## Module Organization
//!
//! ### Agent Module (`agent`)
//! [`agent::ClientSyncAgent`] owns the mirror of remote penguins:
//! - Sends the join intent once the connection is ready and a hat is chosen
//! - Applies snapshots, joins, moves, emoji and departures from the server
//! - Forwards move and emoji intents through a [`agent::Transport`]
//!
//! ### Controller Module (`controller`)
//! Turns held keys into movement of the local penguin:
//! - Fixed speed, with horizontal keys deciding the facing
//! - Clamped to the walls of the world
//! - Reports position on change and on a fixed resend interval
//!
//! It also holds the emoji tally and the random input source used by the
//! headless client.
//!
//! ### Network Module (`network`)
//! The WebSocket session loop. It reconnects after a drop and joins again
//! with the same hat.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{Client, ClientConfig};
//! use shared::Hat;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig {
//!         hat: Hat::Party,
//!         ..ClientConfig::default()
//!     };
//!
//!     let mut client = Client::new(config);
//!     client.run_until(tokio::signal::ctrl_c()).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod controller;
pub mod network;
