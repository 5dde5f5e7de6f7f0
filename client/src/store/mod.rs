//! Remote table seams and the adapters the sync core builds on them.
//!
//! The hosted backend is reached through two traits:
//! - [`PositionTable`]: one mutable row per player, with a realtime feed of
//!   every create/update/delete.
//! - [`EventTable`]: append-only durable game events, with a realtime feed
//!   of creations.
//!
//! [`MemoryBackend`] implements both in-process. [`PositionStore`] and
//! [`GameEventChannel`] wrap them with the sync core's error discipline:
//! failures are logged where they happen and returned for inspection.
//!
//! ## Feed ordering
//! Each table's feed is a single [`tokio::sync::broadcast`] channel written
//! while the table lock is held, so notifications arrive in write order. That
//! gives every player's create → updates → delete sequence in order. A
//! receiver that falls behind skips the oldest notifications and logs it.

use async_trait::async_trait;
use log::{debug, warn};
use shared::{GameEventRecord, Position, PositionRecord, RecordChange};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::error::{Result, SyncError};
use crate::subscriptions::Subscription;

pub mod events;
pub mod memory;
pub mod positions;

pub use events::GameEventChannel;
pub use memory::MemoryBackend;
pub use positions::PositionStore;

/// The remote `player_positions` table.
#[async_trait]
pub trait PositionTable: Send + Sync + 'static {
    async fn create(&self, user: &str, position: Position) -> Result<PositionRecord>;

    async fn update(&self, id: &str, position: Position) -> Result<PositionRecord>;

    async fn delete(&self, id: &str) -> Result<()>;

    /// The oldest record owned by `user`, if any.
    async fn first_by_user(&self, user: &str) -> Result<Option<PositionRecord>>;

    async fn list(&self) -> Result<Vec<PositionRecord>>;

    fn subscribe(&self) -> broadcast::Receiver<RecordChange<PositionRecord>>;
}

/// The remote append-only `game_events` table.
#[async_trait]
pub trait EventTable: Send + Sync + 'static {
    async fn create(&self, event_type: &str, data: serde_json::Value) -> Result<GameEventRecord>;

    fn subscribe(&self) -> broadcast::Receiver<RecordChange<GameEventRecord>>;
}

/// Drives a realtime feed on its own task until the returned subscription
/// is cancelled or the feed closes.
pub(crate) fn spawn_feed<R, F>(
    name: &'static str,
    mut rx: broadcast::Receiver<RecordChange<R>>,
    mut handler: F,
) -> Subscription
where
    R: Clone + Send + 'static,
    F: FnMut(RecordChange<R>) + Send + 'static,
{
    let task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(change) => handler(change),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("{} feed lagged, skipped {} notification(s)", name, skipped);
                }
                Err(RecvError::Closed) => {
                    debug!("{} feed closed", name);
                    break;
                }
            }
        }
    });
    Subscription::new(move || task.abort())
}

/// Logs a swallowed remote failure at a level matching its severity.
pub(crate) fn log_failure(operation: &str, err: &SyncError) {
    match err {
        SyncError::NotFound(_) => debug!("{} skipped: {}", operation, err),
        _ => warn!("{} failed [{}]: {}", operation, err.as_label(), err),
    }
}
