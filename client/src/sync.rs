//! Per-player session orchestration.
//!
//! A [`SyncManager`] ties one local player to the event bus and to both
//! remote channels:
//!
//! - **Outbound motion.** Local `player_moved` events for this player go
//!   through a [`Throttle`]; each throttled position is sent on the socket
//!   (when one is in use) and written to the player's position record.
//! - **Inbound motion.** Socket frames from other players become
//!   `player_moved` on the bus. Without a socket, the position table's
//!   `update` feed is used instead; with one, table updates are not
//!   re-broadcast so motion is never delivered twice.
//! - **Presence.** Position record `create`/`delete` become `player_spawned`
//!   and `player_quit`.
//! - **Durable events.** Self-originated `game_ended`, `powerup_collected`
//!   and `powerup_used` are appended to the event table in emission order.
//!   Events read back from the table are re-emitted on the bus unless this
//!   player sent them.
//!
//! Only the manager holds the remote table handles; every other component
//! talks to it through the bus.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use shared::{EventKind, GameEvent, PlayerId, Position, RecordAction, RecordId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::SyncConfig;
use crate::error::Result;
use crate::event_bus::EventBus;
use crate::store::{GameEventChannel, PositionStore};
use crate::subscriptions::{lock, Subscription, SubscriptionManager};
use crate::throttle::Throttle;
use crate::transport::{TransportClient, TransportError};

/// How long shutdown waits for queued durable events to reach the table.
const DURABLE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

pub struct SyncManager {
    bus: EventBus,
    player_id: PlayerId,
    record_id: RecordId,
    positions: PositionStore,
    events: GameEventChannel,
    transport: Option<TransportClient>,
    config: SyncConfig,
    subscriptions: SubscriptionManager,
    throttle: Mutex<Option<Arc<Throttle<Position>>>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    shut_down: AtomicBool,
}

impl SyncManager {
    pub fn new(
        bus: EventBus,
        player_id: impl Into<PlayerId>,
        record_id: impl Into<RecordId>,
        positions: PositionStore,
        events: GameEventChannel,
        transport: Option<TransportClient>,
        config: SyncConfig,
    ) -> Self {
        Self {
            bus,
            player_id: player_id.into(),
            record_id: record_id.into(),
            positions,
            events,
            transport,
            config,
            subscriptions: SubscriptionManager::new(),
            throttle: Mutex::new(None),
            forwarder: Mutex::new(None),
            started: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Creates (or recreates) the player's position record at `spawn` and
    /// builds a manager around it. Call [`setup`](Self::setup) next.
    pub async fn join(
        bus: EventBus,
        player_id: impl Into<PlayerId>,
        spawn: Position,
        positions: PositionStore,
        events: GameEventChannel,
        transport: Option<TransportClient>,
        config: SyncConfig,
    ) -> Result<Self> {
        let player_id = player_id.into();
        let record_id = positions.create_or_recreate(&player_id, spawn).await?;
        info!("Player {} joined with record {}", player_id, record_id);
        Ok(Self::new(
            bus, player_id, record_id, positions, events, transport, config,
        ))
    }

    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    /// Whether motion travels over the socket rather than the table feed.
    pub fn motion_via_transport(&self) -> bool {
        self.config.use_transport && self.transport.is_some()
    }

    /// Wires the bus to the remote channels. Only the first call has any
    /// effect, and none after [`shutdown`](Self::shutdown). Must run inside a
    /// tokio runtime.
    pub fn setup(&self) {
        if self.shut_down.load(Ordering::SeqCst) {
            warn!("Sync for player {} was shut down, not setting up", self.player_id);
            return;
        }
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Sync for player {} is already set up", self.player_id);
            return;
        }

        self.subscriptions.add(self.subscribe_positions());
        self.subscriptions.add(self.subscribe_events());
        if let Some(subscription) = self.subscribe_transport() {
            self.subscriptions.add(subscription);
        }
        self.subscriptions.add(self.forward_local_moves());
        self.subscriptions.add_all(self.forward_durable_events());

        info!(
            "Sync for player {} set up (motion via {})",
            self.player_id,
            if self.motion_via_transport() {
                "socket"
            } else {
                "position table"
            }
        );
    }

    /// Emits `player_spawned` for every record that exists right now,
    /// including this player's own. Returns how many were emitted.
    pub async fn emit_existing_positions(&self) -> Result<usize> {
        let records = self.positions.list_all().await?;
        for record in &records {
            self.bus.emit(GameEvent::PlayerSpawned {
                id: record.user.clone(),
                position: record.position(),
            });
        }
        debug!("Replayed {} existing position record(s)", records.len());
        Ok(records.len())
    }

    /// Tears the session down: cancels every subscription, stops the
    /// throttle, flushes queued durable events, then deletes this player's
    /// position record. Later calls do nothing. Failures are logged.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down sync for player {}", self.player_id);

        self.subscriptions.cancel_all();

        if let Some(throttle) = lock(&self.throttle).take() {
            throttle.abort();
        }

        let forwarder = lock(&self.forwarder).take();
        if let Some(forwarder) = forwarder {
            if timeout(DURABLE_FLUSH_TIMEOUT, forwarder).await.is_err() {
                warn!("Timed out flushing durable events for {}", self.player_id);
            }
        }

        if self.positions.delete_by_player(&self.player_id).await.is_ok() {
            info!("Removed position record for player {}", self.player_id);
        }
    }

    fn subscribe_positions(&self) -> Subscription {
        let bus = self.bus.clone();
        let local_id = self.player_id.clone();
        let rebroadcast_updates = !self.motion_via_transport();

        self.positions.subscribe(move |action, record| {
            if record.user == local_id {
                return;
            }
            let event = match action {
                RecordAction::Create => GameEvent::PlayerSpawned {
                    position: record.position(),
                    id: record.user,
                },
                RecordAction::Update if rebroadcast_updates => GameEvent::PlayerMoved {
                    position: record.position(),
                    player_id: record.user,
                },
                RecordAction::Update => return,
                RecordAction::Delete => GameEvent::PlayerQuit { id: record.user },
            };
            bus.emit(event);
        })
    }

    fn subscribe_events(&self) -> Subscription {
        let bus = self.bus.clone();
        let local_id = self.player_id.clone();

        self.events.subscribe(move |_, event| {
            if event.emitted_by() == Some(local_id.as_str()) {
                return;
            }
            bus.emit(event);
        })
    }

    fn subscribe_transport(&self) -> Option<Subscription> {
        if !self.motion_via_transport() {
            return None;
        }
        let transport = self.transport.as_ref()?;
        let bus = self.bus.clone();
        let local_id = self.player_id.clone();

        Some(transport.subscribe_to_messages(move |message| {
            if message.id == local_id {
                return;
            }
            bus.emit(GameEvent::PlayerMoved {
                player_id: message.id.clone(),
                position: message.position(),
            });
        }))
    }

    fn forward_local_moves(&self) -> Subscription {
        let positions = self.positions.clone();
        let record_id = self.record_id.clone();
        let player_id = self.player_id.clone();
        let transport = if self.motion_via_transport() {
            self.transport.clone()
        } else {
            None
        };

        let throttle = Arc::new(Throttle::spawn(
            self.config.throttle_window,
            move |position: Position| {
                let positions = positions.clone();
                let record_id = record_id.clone();
                let player_id = player_id.clone();
                let transport = transport.clone();
                async move {
                    if let Some(transport) = &transport {
                        match transport.emit_message(&player_id, position.x, position.y) {
                            Ok(()) => {}
                            Err(TransportError::NotConnected) => {
                                debug!("Socket not open, dropped frame for {}", player_id);
                            }
                            Err(e) => warn!("Failed to send frame [{}]: {}", e.as_label(), e),
                        }
                    }
                    let _ = positions.update(&record_id, position).await;
                }
            },
        ));
        *lock(&self.throttle) = Some(Arc::clone(&throttle));

        let local_id = self.player_id.clone();
        self.bus.on(EventKind::PlayerMoved, move |event| {
            if let GameEvent::PlayerMoved {
                player_id,
                position,
            } = event
            {
                if *player_id == local_id {
                    throttle.push(*position);
                }
            }
        })
    }

    /// Queues self-originated durable events for a single writer task so
    /// they reach the table in the order they were emitted.
    fn forward_durable_events(&self) -> Vec<Subscription> {
        let (tx, mut rx) = mpsc::unbounded_channel::<GameEvent>();
        let events = self.events.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let _ = events.publish(&event).await;
            }
        });
        *lock(&self.forwarder) = Some(forwarder);

        EventKind::ALL
            .iter()
            .copied()
            .filter(EventKind::is_durable)
            .map(|kind| {
                let tx = tx.clone();
                let local_id = self.player_id.clone();
                self.bus.on(kind, move |event| {
                    if event.emitted_by() == Some(local_id.as_str()) {
                        let _ = tx.send(event.clone());
                    }
                })
            })
            .collect()
    }
}
