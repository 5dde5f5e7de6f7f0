//! In-process backend implementing both remote tables.
//!
//! Record ids mimic the hosted backend's: 15 lowercase alphanumeric
//! characters. `set_offline(true)` makes every call fail with a backend
//! error until switched back, which is how tests simulate network blips.

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use shared::{
    get_timestamp, GameEventRecord, Position, PositionRecord, RecordAction, RecordChange,
    RecordId,
};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, RwLock};

use super::{EventTable, PositionTable};
use crate::error::{Result, SyncError};

const FEED_CAPACITY: usize = 1024;
const RECORD_ID_LEN: usize = 15;

pub struct MemoryBackend {
    positions: RwLock<Vec<PositionRecord>>,
    events: RwLock<Vec<GameEventRecord>>,
    position_feed: broadcast::Sender<RecordChange<PositionRecord>>,
    event_feed: broadcast::Sender<RecordChange<GameEventRecord>>,
    offline: AtomicBool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (position_feed, _) = broadcast::channel(FEED_CAPACITY);
        let (event_feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            positions: RwLock::new(Vec::new()),
            events: RwLock::new(Vec::new()),
            position_feed,
            event_feed,
            offline: AtomicBool::new(false),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Snapshot of every live position record, oldest first.
    pub async fn positions(&self) -> Vec<PositionRecord> {
        self.positions.read().await.clone()
    }

    /// Snapshot of every stored game event, oldest first.
    pub async fn events(&self) -> Vec<GameEventRecord> {
        self.events.read().await.clone()
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::Backend("backend offline".to_string()));
        }
        Ok(())
    }

    fn next_id() -> RecordId {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(RECORD_ID_LEN)
            .map(|c| char::from(c).to_ascii_lowercase())
            .collect()
    }
}

#[async_trait]
impl PositionTable for MemoryBackend {
    async fn create(&self, user: &str, position: Position) -> Result<PositionRecord> {
        self.check_online()?;
        let record = PositionRecord {
            id: Self::next_id(),
            user: user.to_string(),
            x: Some(position.x),
            y: Some(position.y),
        };

        let mut positions = self.positions.write().await;
        positions.push(record.clone());
        let _ = self.position_feed.send(RecordChange {
            action: RecordAction::Create,
            record: record.clone(),
        });
        Ok(record)
    }

    async fn update(&self, id: &str, position: Position) -> Result<PositionRecord> {
        self.check_online()?;
        let mut positions = self.positions.write().await;
        let record = positions
            .iter_mut()
            .find(|record| record.id == id)
            .ok_or_else(|| SyncError::NotFound(format!("position record {}", id)))?;

        record.x = Some(position.x);
        record.y = Some(position.y);
        let record = record.clone();
        let _ = self.position_feed.send(RecordChange {
            action: RecordAction::Update,
            record: record.clone(),
        });
        Ok(record)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.check_online()?;
        let mut positions = self.positions.write().await;
        let index = positions
            .iter()
            .position(|record| record.id == id)
            .ok_or_else(|| SyncError::NotFound(format!("position record {}", id)))?;

        let record = positions.remove(index);
        let _ = self.position_feed.send(RecordChange {
            action: RecordAction::Delete,
            record,
        });
        Ok(())
    }

    async fn first_by_user(&self, user: &str) -> Result<Option<PositionRecord>> {
        self.check_online()?;
        let positions = self.positions.read().await;
        Ok(positions.iter().find(|record| record.user == user).cloned())
    }

    async fn list(&self) -> Result<Vec<PositionRecord>> {
        self.check_online()?;
        Ok(self.positions.read().await.clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<RecordChange<PositionRecord>> {
        self.position_feed.subscribe()
    }
}

#[async_trait]
impl EventTable for MemoryBackend {
    async fn create(&self, event_type: &str, data: serde_json::Value) -> Result<GameEventRecord> {
        self.check_online()?;
        let record = GameEventRecord {
            id: Self::next_id(),
            event_type: event_type.to_string(),
            data,
            created: get_timestamp(),
        };

        let mut events = self.events.write().await;
        events.push(record.clone());
        let _ = self.event_feed.send(RecordChange {
            action: RecordAction::Create,
            record: record.clone(),
        });
        Ok(record)
    }

    fn subscribe(&self) -> broadcast::Receiver<RecordChange<GameEventRecord>> {
        self.event_feed.subscribe()
    }
}
