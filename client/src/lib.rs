//! # Sync Client Library
//!
//! This library is the client-side synchronization core of the multiplayer
//! platformer. It keeps one local player's session in step with everyone
//! else by reconciling locally generated actions with remotely observed
//! state changes that arrive over two parallel channels.
//!
//! ## Architecture Overview
//!
//! Rendering, physics and input are external collaborators. The core only
//! needs somewhere to spawn, move and despawn remote players and a way to
//! read positions, which the [`world::World`] trait provides.
//!
//! ### Two Remote Channels
//! - **Realtime tables.** A hosted backend exposes a `player_positions`
//!   table (one live row per player) and an append-only `game_events` table,
//!   each with a push feed of changes. They carry everything that must
//!   survive reconnects: spawn, despawn, game over and powerups.
//! - **Low-latency socket.** A WebSocket relay fans out one `{id, x, y}`
//!   frame per movement tick. Nothing on it is persisted and a frame lost
//!   around a reconnect is simply gone.
//!
//! ### One Event Bus Per Session
//! Local components never talk to the remote channels directly. They emit
//! and observe [`shared::GameEvent`]s on an [`event_bus::EventBus`] that is
//! passed to each of them at construction, and the
//! [`sync::SyncManager`] bridges bus traffic to the network.
//!
//! ## Module Organization
//!
//! ### Event Bus Module (`event_bus`)
//! Synchronous publish/subscribe keyed by event kind:
//! - Multi-shot and one-shot listeners
//! - Snapshot dispatch, safe against reentrant subscribe/cancel
//! - Listener panics propagate to the emitter
//!
//! ### Subscriptions Module (`subscriptions`)
//! Idempotent cancellation handles and the manager that cancels a group of
//! them in insertion order.
//!
//! ### Store Module (`store`)
//! Seams over the hosted tables and the adapters built on them:
//! - `PositionStore`: at most one record per player, best-effort writes
//! - `GameEventChannel`: append and subscribe, durable kinds only
//! - `MemoryBackend`: an in-process implementation of both tables
//!
//! ### Transport Module (`transport`)
//! Reconnecting WebSocket client with a bounded retry count and a fixed
//! interval between attempts.
//!
//! ### Throttle Module (`throttle`)
//! Leading-edge throttle with one coalesced trailing send per window.
//!
//! ### Sync Module (`sync`)
//! The per-player orchestrator: join, throttled movement, inbound
//! translation, durable event forwarding and shutdown cleanup.
//!
//! ### Powerups Module (`powerups`)
//! Single-slot powerup inventory and the reaction to powerups used by
//! others.
//!
//! ### World Module (`world`)
//! The collaborator trait plus the remote-player binding that deduplicates
//! spawns and filters out the local player.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::config::{SyncConfig, TransportConfig};
//! use client::event_bus::EventBus;
//! use client::store::{GameEventChannel, MemoryBackend, PositionStore};
//! use client::sync::SyncManager;
//! use client::transport::TransportClient;
//! use shared::{GameEvent, Position};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = Arc::new(MemoryBackend::new());
//!     let bus = EventBus::new();
//!
//!     let transport = TransportClient::new(TransportConfig::new("ws://127.0.0.1:8080/ws"));
//!     transport.connect()?;
//!
//!     // Creates this player's position record and wires up the channels
//!     let manager = SyncManager::join(
//!         bus.clone(),
//!         "player-1",
//!         Position::new(0.0, 0.0),
//!         PositionStore::new(backend.clone()),
//!         GameEventChannel::new(backend.clone()),
//!         Some(transport.clone()),
//!         SyncConfig::default(),
//!     )
//!     .await?;
//!     manager.setup();
//!     manager.emit_existing_positions().await?;
//!
//!     // Local movement goes out throttled on the socket and the table
//!     bus.emit(GameEvent::PlayerMoved {
//!         player_id: "player-1".to_string(),
//!         position: Position::new(4.0, 0.0),
//!     });
//!
//!     manager.shutdown().await;
//!     transport.disconnect();
//!     Ok(())
//! }
//! ```
//!
//! ## Failure Model
//!
//! Nothing in this crate is fatal to the process:
//! - Remote-call failures are logged where they happen and handed back as
//!   [`error::SyncError`]; position sync heals itself on the next tick.
//! - Sending on a closed socket fails with
//!   [`transport::TransportError::NotConnected`] and the frame is dropped.
//! - Malformed inbound frames and records are logged and skipped without
//!   affecting other subscribers.

pub mod config;
pub mod error;
pub mod event_bus;
mod listeners;
pub mod powerups;
pub mod store;
pub mod subscriptions;
pub mod sync;
pub mod throttle;
pub mod transport;
pub mod world;
