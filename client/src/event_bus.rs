//! In-process publish/subscribe for [`GameEvent`]s.
//!
//! [`EventBus`] is a context object: each session (and each test) builds its
//! own and hands clones to every component that needs it. Clones share one
//! listener table.
//!
//! ## Dispatch rules
//! - Listeners run synchronously on the emitting task, in subscription order.
//! - `emit` works on a snapshot of the listener list, so subscribing or
//!   cancelling from inside a listener only affects later emits.
//! - A `once` listener is removed before its callback runs; reentrant emits
//!   from inside that callback do not reach it again.
//! - Listener panics are not caught. They unwind into the `emit` call site
//!   (fail-fast), the same as any other bug in the caller's turn.

use std::sync::Arc;

use shared::{EventKind, GameEvent};

use crate::listeners::ListenerTable;
use crate::subscriptions::Subscription;

#[derive(Clone)]
pub struct EventBus {
    listeners: ListenerTable<EventKind, GameEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: ListenerTable::new(),
        }
    }

    /// Calls `callback` for every event of `kind` until the returned handle
    /// is cancelled.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> Subscription
    where
        F: Fn(&GameEvent) + Send + Sync + 'static,
    {
        self.listeners.register(kind, false, Arc::new(callback))
    }

    /// Calls `callback` for the next event of `kind` only.
    pub fn once<F>(&self, kind: EventKind, callback: F) -> Subscription
    where
        F: Fn(&GameEvent) + Send + Sync + 'static,
    {
        self.listeners.register(kind, true, Arc::new(callback))
    }

    /// Delivers `event` to the listeners of its kind. Returns how many ran.
    pub fn emit(&self, event: GameEvent) -> usize {
        let kind = event.kind();
        let invoked = self.listeners.dispatch(&kind, &event);
        log::trace!("emitted {} to {} listener(s)", kind, invoked);
        invoked
    }

    /// Drops the listeners of one kind, or of every kind.
    pub fn clear(&self, kind: Option<EventKind>) {
        self.listeners.clear(kind.as_ref());
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.count(&kind)
    }
}
