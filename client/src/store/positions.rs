//! Adapter over the position table.
//!
//! Keeps at most one live record per player by deleting before creating.
//! Two joins for the same player that overlap can still both create; the
//! next join or leave removes every record the player owns, which heals it.

use log::{debug, info};
use shared::{Position, PositionRecord, RecordAction, RecordId};
use std::sync::Arc;

use super::{log_failure, spawn_feed, PositionTable};
use crate::error::{Result, SyncError};
use crate::subscriptions::Subscription;

/// Upper bound on records removed by one `delete_by_player` call.
const MAX_RECORDS_PER_PLAYER: usize = 8;

#[derive(Clone)]
pub struct PositionStore {
    table: Arc<dyn PositionTable>,
}

impl PositionStore {
    pub fn new(table: Arc<dyn PositionTable>) -> Self {
        Self { table }
    }

    /// Replaces any record owned by `player_id` with a fresh one and returns
    /// its id. Cleanup failures are logged and do not block creation.
    pub async fn create_or_recreate(&self, player_id: &str, position: Position) -> Result<RecordId> {
        let _ = self.delete_by_player(player_id).await;

        let record = self.table.create(player_id, position).await.map_err(|err| {
            log_failure("create position record", &err);
            err
        })?;
        info!("Created position record {} for player {}", record.id, player_id);
        Ok(record.id)
    }

    /// Best-effort write of a new position. A missing record is reported as
    /// `NotFound` and is expected after a concurrent leave.
    pub async fn update(&self, record_id: &str, position: Position) -> Result<()> {
        match self.table.update(record_id, position).await {
            Ok(_) => Ok(()),
            Err(err) => {
                log_failure("update position record", &err);
                Err(err)
            }
        }
    }

    /// Removes every record owned by `player_id`. Finding none is success.
    pub async fn delete_by_player(&self, player_id: &str) -> Result<()> {
        for _ in 0..MAX_RECORDS_PER_PLAYER {
            let record = match self.table.first_by_user(player_id).await {
                Ok(Some(record)) => record,
                Ok(None) => return Ok(()),
                Err(err) => {
                    log_failure("look up position record", &err);
                    return Err(err);
                }
            };

            match self.table.delete(&record.id).await {
                Ok(()) => debug!("Deleted position record {} for player {}", record.id, player_id),
                // Removed by a concurrent leave; carry on with any duplicates.
                Err(SyncError::NotFound(_)) => {
                    debug!("Position record {} was already gone", record.id)
                }
                Err(err) => {
                    log_failure("delete position record", &err);
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Every current record, for replaying existing players to a new client.
    pub async fn list_all(&self) -> Result<Vec<PositionRecord>> {
        self.table.list().await.map_err(|err| {
            log_failure("list position records", &err);
            err
        })
    }

    /// Pushes every create/update/delete across all players to `handler`.
    pub fn subscribe<F>(&self, mut handler: F) -> Subscription
    where
        F: FnMut(RecordAction, PositionRecord) + Send + 'static,
    {
        spawn_feed("player_positions", self.table.subscribe(), move |change| {
            handler(change.action, change.record)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBackend;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn store() -> (Arc<MemoryBackend>, PositionStore) {
        let backend = Arc::new(MemoryBackend::new());
        let store = PositionStore::new(backend.clone());
        (backend, store)
    }

    #[tokio::test]
    async fn test_recreate_leaves_single_record() {
        let (backend, store) = store();

        let first = store
            .create_or_recreate("player_a", Position::new(10.0, 20.0))
            .await
            .unwrap();
        let second = store
            .create_or_recreate("player_a", Position::new(30.0, 40.0))
            .await
            .unwrap();

        let records: Vec<PositionRecord> = backend
            .positions()
            .await
            .into_iter()
            .filter(|record| record.user == "player_a")
            .collect();

        assert_ne!(first, second);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, second);
        assert_eq!(records[0].position(), Position::new(30.0, 40.0));
    }

    #[tokio::test]
    async fn test_recreate_leaves_other_players_alone() {
        let (backend, store) = store();

        store
            .create_or_recreate("player_a", Position::new(1.0, 1.0))
            .await
            .unwrap();
        store
            .create_or_recreate("player_b", Position::new(2.0, 2.0))
            .await
            .unwrap();
        store
            .create_or_recreate("player_a", Position::new(3.0, 3.0))
            .await
            .unwrap();

        assert_eq!(backend.positions().await.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_by_player_heals_duplicates() {
        let (backend, store) = store();
        PositionTable::create(&*backend, "player_a", Position::new(0.0, 0.0))
            .await
            .unwrap();
        PositionTable::create(&*backend, "player_a", Position::new(1.0, 1.0))
            .await
            .unwrap();

        store.delete_by_player("player_a").await.unwrap();
        assert!(backend.positions().await.is_empty());
    }

    #[tokio::test]
    async fn test_delete_by_player_without_record() {
        let (_, store) = store();
        assert!(store.delete_by_player("ghost").await.is_ok());
    }

    #[tokio::test]
    async fn test_update_failures_are_reported() {
        let (backend, store) = store();
        let id = store
            .create_or_recreate("player_a", Position::new(0.0, 0.0))
            .await
            .unwrap();

        store.delete_by_player("player_a").await.unwrap();
        let result = store.update(&id, Position::new(5.0, 5.0)).await;
        assert!(matches!(result, Err(SyncError::NotFound(_))));

        backend.set_offline(true);
        let result = store.update(&id, Position::new(5.0, 5.0)).await;
        assert!(matches!(result, Err(SyncError::Backend(_))));
    }

    /// Table whose owner lookup always fails, to exercise cleanup failures.
    struct BrokenLookup(MemoryBackend);

    #[async_trait::async_trait]
    impl PositionTable for BrokenLookup {
        async fn create(&self, user: &str, position: Position) -> Result<PositionRecord> {
            PositionTable::create(&self.0, user, position).await
        }

        async fn update(&self, id: &str, position: Position) -> Result<PositionRecord> {
            self.0.update(id, position).await
        }

        async fn delete(&self, id: &str) -> Result<()> {
            self.0.delete(id).await
        }

        async fn first_by_user(&self, _user: &str) -> Result<Option<PositionRecord>> {
            Err(SyncError::Backend("lookup timed out".to_string()))
        }

        async fn list(&self) -> Result<Vec<PositionRecord>> {
            self.0.list().await
        }

        fn subscribe(&self) -> tokio::sync::broadcast::Receiver<shared::RecordChange<PositionRecord>> {
            PositionTable::subscribe(&self.0)
        }
    }

    #[tokio::test]
    async fn test_create_survives_failed_cleanup() {
        let table = Arc::new(BrokenLookup(MemoryBackend::new()));
        let store = PositionStore::new(table.clone());

        let id = store
            .create_or_recreate("player_a", Position::new(0.0, 0.0))
            .await
            .unwrap();

        assert!(store.delete_by_player("player_a").await.is_err());
        assert_eq!(table.0.positions().await[0].id, id);
    }

    /// Table where the first delete loses a race with another leave: the
    /// record disappears but the call reports `NotFound`.
    struct RacingDelete {
        inner: MemoryBackend,
        raced: AtomicBool,
    }

    #[async_trait::async_trait]
    impl PositionTable for RacingDelete {
        async fn create(&self, user: &str, position: Position) -> Result<PositionRecord> {
            PositionTable::create(&self.inner, user, position).await
        }

        async fn update(&self, id: &str, position: Position) -> Result<PositionRecord> {
            self.inner.update(id, position).await
        }

        async fn delete(&self, id: &str) -> Result<()> {
            if !self.raced.swap(true, Ordering::SeqCst) {
                self.inner.delete(id).await?;
                return Err(SyncError::NotFound(id.to_string()));
            }
            self.inner.delete(id).await
        }

        async fn first_by_user(&self, user: &str) -> Result<Option<PositionRecord>> {
            self.inner.first_by_user(user).await
        }

        async fn list(&self) -> Result<Vec<PositionRecord>> {
            self.inner.list().await
        }

        fn subscribe(&self) -> tokio::sync::broadcast::Receiver<shared::RecordChange<PositionRecord>> {
            PositionTable::subscribe(&self.inner)
        }
    }

    #[tokio::test]
    async fn test_delete_by_player_continues_past_concurrent_delete() {
        let table = Arc::new(RacingDelete {
            inner: MemoryBackend::new(),
            raced: AtomicBool::new(false),
        });
        let store = PositionStore::new(table.clone());
        for x in [0.0, 1.0, 2.0] {
            PositionTable::create(&table.inner, "player_a", Position::new(x, 0.0))
                .await
                .unwrap();
        }

        assert!(store.delete_by_player("player_a").await.is_ok());
        assert!(table.inner.positions().await.is_empty());
    }

    #[tokio::test]
    async fn test_create_fails_when_backend_offline() {
        let (backend, store) = store();
        backend.set_offline(true);
        assert!(store
            .create_or_recreate("player_a", Position::new(0.0, 0.0))
            .await
            .is_err());
        assert!(backend.positions().await.is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_and_cancel() {
        let (_, store) = store();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = store.subscribe(move |action, record| {
            let _ = tx.send((action, record.user));
        });

        let id = store
            .create_or_recreate("player_a", Position::new(0.0, 0.0))
            .await
            .unwrap();
        store.update(&id, Position::new(1.0, 1.0)).await.unwrap();

        let wait = Duration::from_secs(1);
        assert_eq!(
            timeout(wait, rx.recv()).await.unwrap(),
            Some((RecordAction::Create, "player_a".to_string()))
        );
        assert_eq!(
            timeout(wait, rx.recv()).await.unwrap(),
            Some((RecordAction::Update, "player_a".to_string()))
        );

        subscription.cancel();
        tokio::task::yield_now().await;
        store.delete_by_player("player_a").await.unwrap();

        // The feed task was aborted, dropping the handler and its sender.
        assert_eq!(timeout(wait, rx.recv()).await.unwrap(), None);
    }
}
