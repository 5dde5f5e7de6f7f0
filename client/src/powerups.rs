//! Single-slot powerup inventory for the local player.
//!
//! ```text
//! Idle --pickup--> Holding(kind) --use--> Idle
//! ```
//! Picking up while holding does nothing; the first powerup wins. A pickup is
//! triggered by a `powerup_collected` event emitted by the local player.
//! Using a powerup announces `powerup_used` on the bus (the sync layer makes
//! it durable) and always returns to `Idle`.
//!
//! The manager also reacts to powerups other players use: the effect is
//! applied locally when this player is in the target set, or when the
//! powerup affects everyone.

use std::cmp::Ordering;
use std::sync::{Arc, Mutex};

use log::{debug, info};
use shared::{EffectScope, EventKind, GameEvent, PlayerId, Position, PowerupType};

use crate::event_bus::EventBus;
use crate::subscriptions::{lock, SubscriptionManager};
use crate::world::World;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerupState {
    #[default]
    Idle,
    Holding(PowerupType),
}

/// The `n` players closest to `origin`, nearest first.
///
/// Ties keep their input order. Fewer than `n` players yields all of them.
pub fn nearest_players(origin: Position, players: &[(PlayerId, Position)], n: usize) -> Vec<PlayerId> {
    let mut by_distance: Vec<(f32, &PlayerId)> = players
        .iter()
        .map(|(id, position)| (origin.distance(position), id))
        .collect();
    by_distance.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
    by_distance
        .into_iter()
        .take(n)
        .map(|(_, id)| id.clone())
        .collect()
}

struct Inner {
    player_id: PlayerId,
    bus: EventBus,
    world: Arc<dyn World>,
    state: Mutex<PowerupState>,
}

impl Inner {
    fn pickup(&self, kind: PowerupType) -> bool {
        let mut state = lock(&self.state);
        match *state {
            PowerupState::Idle => {
                *state = PowerupState::Holding(kind);
                info!("Player {} picked up {}", self.player_id, kind);
                true
            }
            PowerupState::Holding(held) => {
                debug!(
                    "Player {} already holds {}, ignoring {}",
                    self.player_id, held, kind
                );
                false
            }
        }
    }

    fn react_to_use(&self, emit_by: &str, kind: PowerupType, target: Option<&[PlayerId]>) {
        if emit_by == self.player_id {
            return;
        }

        let affected = match kind.scope() {
            EffectScope::User => false,
            EffectScope::Nearest(_) => {
                target.is_some_and(|target| target.iter().any(|id| *id == self.player_id))
            }
            EffectScope::Everyone => true,
        };

        if affected {
            info!("Player {} hit by {} from {}", self.player_id, kind, emit_by);
            self.world.apply_powerup(kind, emit_by);
        }
    }
}

pub struct PowerupManager {
    inner: Arc<Inner>,
    subscriptions: SubscriptionManager,
}

impl PowerupManager {
    /// Creates the manager and starts listening on `bus`.
    pub fn new(bus: EventBus, player_id: impl Into<PlayerId>, world: Arc<dyn World>) -> Self {
        let inner = Arc::new(Inner {
            player_id: player_id.into(),
            bus: bus.clone(),
            world,
            state: Mutex::new(PowerupState::Idle),
        });
        let subscriptions = SubscriptionManager::new();

        let collected = {
            let inner = Arc::clone(&inner);
            bus.on(EventKind::PowerupCollected, move |event| {
                if let GameEvent::PowerupCollected { emit_by, kind } = event {
                    if *emit_by == inner.player_id {
                        inner.pickup(*kind);
                    }
                }
            })
        };

        let used = {
            let inner = Arc::clone(&inner);
            bus.on(EventKind::PowerupUsed, move |event| {
                if let GameEvent::PowerupUsed {
                    emit_by,
                    kind,
                    target,
                } = event
                {
                    inner.react_to_use(emit_by, *kind, target.as_deref());
                }
            })
        };

        subscriptions.add_all([collected, used]);
        Self {
            inner,
            subscriptions,
        }
    }

    /// Takes `kind` if the slot is empty. Returns whether it was taken.
    pub fn pickup_powerup(&self, kind: PowerupType) -> bool {
        self.inner.pickup(kind)
    }

    pub fn has_powerup(&self) -> bool {
        self.held().is_some()
    }

    pub fn held(&self) -> Option<PowerupType> {
        match *lock(&self.inner.state) {
            PowerupState::Idle => None,
            PowerupState::Holding(kind) => Some(kind),
        }
    }

    pub fn state(&self) -> PowerupState {
        *lock(&self.inner.state)
    }

    /// Uses the held powerup, if any, and returns the `powerup_used` event
    /// that was emitted.
    ///
    /// Targeted powerups carry the nearest other players at the moment of
    /// use. Effects scoped to the user or to everyone are applied to the
    /// local player straight away.
    pub fn use_powerup(&self) -> Option<GameEvent> {
        let kind = {
            let mut state = lock(&self.inner.state);
            match std::mem::take(&mut *state) {
                PowerupState::Idle => return None,
                PowerupState::Holding(kind) => kind,
            }
        };

        let world = &self.inner.world;
        let target = match kind.scope() {
            EffectScope::Nearest(n) => Some(nearest_players(
                world.local_position(),
                &world.remote_positions(),
                n,
            )),
            EffectScope::User | EffectScope::Everyone => None,
        };

        let event = GameEvent::PowerupUsed {
            emit_by: self.inner.player_id.clone(),
            kind,
            target,
        };
        info!("Player {} used {}", self.inner.player_id, kind);
        self.inner.bus.emit(event.clone());

        if matches!(kind.scope(), EffectScope::User | EffectScope::Everyone) {
            world.apply_powerup(kind, &self.inner.player_id);
        }
        Some(event)
    }

    /// Stops listening on the bus. The held powerup is kept.
    pub fn unbind(&self) {
        self.subscriptions.cancel_all();
    }
}
