//! Adapter over the durable game event table. Append and subscribe only.

use log::{debug, warn};
use shared::{GameEvent, RecordAction};
use std::sync::Arc;

use super::{log_failure, spawn_feed, EventTable};
use crate::error::{Result, SyncError};
use crate::subscriptions::Subscription;

#[derive(Clone)]
pub struct GameEventChannel {
    table: Arc<dyn EventTable>,
}

impl GameEventChannel {
    pub fn new(table: Arc<dyn EventTable>) -> Self {
        Self { table }
    }

    /// Appends a durable record for `event`. Transient kinds are refused.
    pub async fn publish(&self, event: &GameEvent) -> Result<()> {
        if !event.is_durable() {
            return Err(SyncError::NotDurable(event.kind()));
        }

        let (event_type, data) = event.to_record_parts()?;
        match self.table.create(&event_type, data).await {
            Ok(record) => {
                debug!("Published {} as record {}", event_type, record.id);
                Ok(())
            }
            Err(err) => {
                log_failure("publish game event", &err);
                Err(err)
            }
        }
    }

    /// Pushes every parsed durable event to `handler`. Records that do not
    /// parse, or that carry a transient kind, are logged and dropped.
    pub fn subscribe<F>(&self, mut handler: F) -> Subscription
    where
        F: FnMut(RecordAction, GameEvent) + Send + 'static,
    {
        spawn_feed("game_events", self.table.subscribe(), move |change| {
            let record = change.record;
            match GameEvent::from_record_parts(&record.event_type, record.data) {
                Ok(event) if event.is_durable() => handler(change.action, event),
                Ok(event) => {
                    warn!(
                        "Dropping game event record {} with transient kind {}",
                        record.id,
                        event.kind()
                    );
                }
                Err(err) => {
                    warn!(
                        "Dropping malformed game event record {} ({}): {}",
                        record.id, record.event_type, err
                    );
                }
            }
        })
    }
}
