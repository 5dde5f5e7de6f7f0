//! Keyed callback table shared by the event bus and the transport client.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::subscriptions::{lock, Subscription};

pub(crate) type Callback<A> = Arc<dyn Fn(&A) + Send + Sync>;

struct Entry<A> {
    id: u64,
    once: bool,
    fired: AtomicBool,
    callback: Callback<A>,
}

struct Table<K, A> {
    next_id: AtomicU64,
    entries: Mutex<HashMap<K, Vec<Arc<Entry<A>>>>>,
}

impl<K: Eq + Hash, A> Table<K, A> {
    fn remove(&self, key: &K, id: u64) {
        let mut entries = lock(&self.entries);
        if let Some(list) = entries.get_mut(key) {
            list.retain(|entry| entry.id != id);
            if list.is_empty() {
                entries.remove(key);
            }
        }
    }
}

/// Callbacks grouped by key, invoked in registration order.
///
/// The lock is never held while a callback runs, so callbacks may register,
/// cancel, or dispatch reentrantly.
pub(crate) struct ListenerTable<K, A> {
    table: Arc<Table<K, A>>,
}

impl<K, A> Clone for ListenerTable<K, A> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
        }
    }
}

impl<K, A> ListenerTable<K, A>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    A: 'static,
{
    pub(crate) fn new() -> Self {
        Self {
            table: Arc::new(Table {
                next_id: AtomicU64::new(1),
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub(crate) fn register(&self, key: K, once: bool, callback: Callback<A>) -> Subscription {
        let id = self.table.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(Entry {
            id,
            once,
            fired: AtomicBool::new(false),
            callback,
        });
        lock(&self.table.entries)
            .entry(key.clone())
            .or_default()
            .push(entry);

        let table: Weak<Table<K, A>> = Arc::downgrade(&self.table);
        Subscription::new(move || {
            if let Some(table) = table.upgrade() {
                table.remove(&key, id);
            }
        })
    }

    /// Invokes a snapshot of the callbacks registered under `key` at call
    /// time. Returns how many callbacks ran.
    pub(crate) fn dispatch(&self, key: &K, arg: &A) -> usize {
        let snapshot: Vec<Arc<Entry<A>>> = lock(&self.table.entries)
            .get(key)
            .cloned()
            .unwrap_or_default();

        let mut invoked = 0;
        for entry in snapshot {
            if entry.once {
                // Claim the single shot before running so a reentrant
                // dispatch cannot invoke it again.
                if entry.fired.swap(true, Ordering::SeqCst) {
                    continue;
                }
                self.table.remove(key, entry.id);
            }
            (entry.callback)(arg);
            invoked += 1;
        }
        invoked
    }

    pub(crate) fn clear(&self, key: Option<&K>) {
        let mut entries = lock(&self.table.entries);
        match key {
            Some(key) => {
                entries.remove(key);
            }
            None => entries.clear(),
        }
    }

    pub(crate) fn count(&self, key: &K) -> usize {
        lock(&self.table.entries).get(key).map_or(0, Vec::len)
    }
}
