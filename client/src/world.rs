//! The game world as seen by the sync core.
//!
//! Rendering and physics live outside this crate. The sync core only needs a
//! place to materialize remote players, move them, remove them, and read
//! where everyone is; [`World`] is that seam. [`RemotePlayers`] binds bus
//! traffic to it with the deduplication the render side is responsible for.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use log::{debug, info};
use shared::{EventKind, GameEvent, PlayerId, Position, PowerupType};

use crate::event_bus::EventBus;
use crate::subscriptions::{lock, SubscriptionManager};

/// Collaborator that owns the entities on screen.
pub trait World: Send + Sync {
    fn spawn_remote(&self, id: &str, position: Position);

    fn move_remote(&self, id: &str, position: Position);

    fn despawn_remote(&self, id: &str);

    fn local_position(&self) -> Position;

    /// Every remote player currently in the world.
    fn remote_positions(&self) -> Vec<(PlayerId, Position)>;

    /// Runs a powerup's effect on the local player.
    fn apply_powerup(&self, kind: PowerupType, emit_by: &str);
}

/// World without a renderer: remembers positions and applied effects.
#[derive(Default)]
pub struct HeadlessWorld {
    local: Mutex<Position>,
    remote: Mutex<HashMap<PlayerId, Position>>,
    spawn_order: Mutex<Vec<PlayerId>>,
    applied: Mutex<Vec<(PowerupType, PlayerId)>>,
}

impl HeadlessWorld {
    pub fn new(local: Position) -> Self {
        Self {
            local: Mutex::new(local),
            ..Self::default()
        }
    }

    pub fn set_local_position(&self, position: Position) {
        *lock(&self.local) = position;
    }

    pub fn remote_position(&self, id: &str) -> Option<Position> {
        lock(&self.remote).get(id).copied()
    }

    /// Ids passed to `spawn_remote`, in call order, including repeats.
    pub fn spawned(&self) -> Vec<PlayerId> {
        lock(&self.spawn_order).clone()
    }

    pub fn applied_powerups(&self) -> Vec<(PowerupType, PlayerId)> {
        lock(&self.applied).clone()
    }
}

impl World for HeadlessWorld {
    fn spawn_remote(&self, id: &str, position: Position) {
        lock(&self.spawn_order).push(id.to_string());
        lock(&self.remote).insert(id.to_string(), position);
    }

    fn move_remote(&self, id: &str, position: Position) {
        if let Some(current) = lock(&self.remote).get_mut(id) {
            *current = position;
        }
    }

    fn despawn_remote(&self, id: &str) {
        lock(&self.remote).remove(id);
    }

    fn local_position(&self) -> Position {
        *lock(&self.local)
    }

    fn remote_positions(&self) -> Vec<(PlayerId, Position)> {
        let mut players: Vec<(PlayerId, Position)> = lock(&self.remote)
            .iter()
            .map(|(id, position)| (id.clone(), *position))
            .collect();
        players.sort_by(|a, b| a.0.cmp(&b.0));
        players
    }

    fn apply_powerup(&self, kind: PowerupType, emit_by: &str) {
        lock(&self.applied).push((kind, emit_by.to_string()));
    }
}

/// Binds `player_spawned`, `player_moved` and `player_quit` to a [`World`].
///
/// Each remote id is spawned at most once while it is present and the local
/// player is never spawned as a remote. Moves for ids that were never
/// spawned are ignored, unless the binding was made with
/// [`spawn_on_first_move`](Self::spawn_on_first_move).
pub struct RemotePlayers {
    seen: Arc<Mutex<HashSet<PlayerId>>>,
    subscriptions: SubscriptionManager,
}

impl RemotePlayers {
    pub fn bind(bus: &EventBus, local_id: &str, world: Arc<dyn World>) -> Self {
        Self::bind_with(bus, local_id, world, false)
    }

    /// Like [`bind`](Self::bind), but a move from an unknown id spawns it at
    /// the moved-to position. For sessions that do not share a position
    /// table, where socket frames are the only sign of other players.
    pub fn spawn_on_first_move(bus: &EventBus, local_id: &str, world: Arc<dyn World>) -> Self {
        Self::bind_with(bus, local_id, world, true)
    }

    fn bind_with(bus: &EventBus, local_id: &str, world: Arc<dyn World>, spawn_unknown: bool) -> Self {
        let seen: Arc<Mutex<HashSet<PlayerId>>> = Arc::new(Mutex::new(HashSet::new()));
        let subscriptions = SubscriptionManager::new();

        let spawn = {
            let seen = Arc::clone(&seen);
            let world = Arc::clone(&world);
            let local_id = local_id.to_string();
            bus.on(EventKind::PlayerSpawned, move |event| {
                if let GameEvent::PlayerSpawned { id, position } = event {
                    if *id == local_id {
                        return;
                    }
                    if lock(&seen).insert(id.clone()) {
                        info!("Spawning remote player {} at ({}, {})", id, position.x, position.y);
                        world.spawn_remote(id, *position);
                    }
                }
            })
        };

        let movement = {
            let seen = Arc::clone(&seen);
            let world = Arc::clone(&world);
            let local_id = local_id.to_string();
            bus.on(EventKind::PlayerMoved, move |event| {
                if let GameEvent::PlayerMoved {
                    player_id,
                    position,
                } = event
                {
                    if *player_id == local_id {
                        return;
                    }
                    if lock(&seen).contains(player_id) {
                        world.move_remote(player_id, *position);
                    } else if spawn_unknown && lock(&seen).insert(player_id.clone()) {
                        info!(
                            "Spawning remote player {} from first move at ({}, {})",
                            player_id, position.x, position.y
                        );
                        world.spawn_remote(player_id, *position);
                    } else {
                        debug!("Ignoring move for unknown player {}", player_id);
                    }
                }
            })
        };

        let quit = {
            let seen = Arc::clone(&seen);
            bus.on(EventKind::PlayerQuit, move |event| {
                if let GameEvent::PlayerQuit { id } = event {
                    if lock(&seen).remove(id) {
                        info!("Removing remote player {}", id);
                        world.despawn_remote(id);
                    }
                }
            })
        };

        subscriptions.add_all([spawn, movement, quit]);
        Self {
            seen,
            subscriptions,
        }
    }

    pub fn is_tracking(&self, id: &str) -> bool {
        lock(&self.seen).contains(id)
    }

    pub fn tracked(&self) -> usize {
        lock(&self.seen).len()
    }

    /// Stops reacting to the bus. Entities already spawned stay in the world.
    pub fn unbind(&self) {
        self.subscriptions.cancel_all();
    }
}
