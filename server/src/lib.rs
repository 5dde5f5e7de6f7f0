//! # Relay Server Library
//!
//! This library provides the low-latency half of the multiplayer platformer's
//! synchronization: a WebSocket relay that fans each player's position frames
//! out to every other connected player. Durable state (who is in the game,
//! game over, powerups) lives in the hosted realtime tables and never passes
//! through here.
//!
//! ## Core Responsibilities
//!
//! ### Frame Fan-Out
//! Each text frame is a JSON `{id, x, y}` position message. The relay checks
//! that it parses, then queues it unchanged for every peer except the one
//! that sent it. Malformed frames are logged and dropped without affecting
//! anyone else.
//!
//! ### Peer Management
//! Handles the lifecycle of every peer connection:
//! - Admission up to a configured capacity
//! - Activity tracking on every received frame
//! - Removal on close, socket error, or silence past the timeout
//!
//! ## Architecture Design
//!
//! ### Task Per Connection Half
//! Every peer gets a reader task and a writer task. Readers validate and fan
//! out; writers drain a per-peer unbounded queue into the socket, so one slow
//! peer never blocks delivery to the others. Per-connection frame order is
//! preserved end to end.
//!
//! ### Timeout Sweep
//! Once a second a sweep drops peers that have been silent longer than the
//! timeout and pings the rest. Clients answer pings automatically, so an idle
//! but healthy peer stays registered.
//!
//! ### No Persistence
//! A frame sent while a peer is reconnecting is simply not delivered to it.
//! Position deltas are superseded by the next tick anyway.
//!
//! ## Module Organization
//!
//! ### Client Manager Module (`client_manager`)
//! Registry of connected peers:
//! - Id assignment and capacity limits
//! - Last-seen tracking and timeout detection
//! - Outbound queue lookup for fan-out
//!
//! ### Network Module (`network`)
//! The listener, the WebSocket handshake, and the per-connection tasks.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::RelayServer;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Bind on port 8080, allow 32 peers, drop peers silent for 10 seconds
//!     let relay = RelayServer::bind("127.0.0.1:8080", 32, Duration::from_secs(10)).await?;
//!
//!     // Runs until the task is dropped
//!     relay.run().await;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod network;
