//! Cancellation handles and their aggregate.
//!
//! Every registration in the sync core (bus listeners, realtime feeds,
//! transport callbacks) hands back a [`Subscription`]. Components collect
//! theirs in a [`SubscriptionManager`] so one shutdown call tears all of them
//! down in a fixed order.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type CancelFn = Box<dyn FnOnce() + Send>;

/// Handle that undoes one registration.
///
/// Clones share the same underlying cancel action, which runs at most once
/// no matter how many clones call [`Subscription::cancel`]. Dropping a handle
/// does not cancel it.
#[derive(Clone)]
pub struct Subscription {
    cancel: Arc<Mutex<Option<CancelFn>>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Arc::new(Mutex::new(Some(Box::new(cancel)))),
        }
    }

    /// Runs the cancel action the first time; later calls do nothing.
    pub fn cancel(&self) {
        let action = lock(&self.cancel).take();
        if let Some(action) = action {
            action();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        lock(&self.cancel).is_none()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Ordered collection of subscriptions cancelled together.
#[derive(Default)]
pub struct SubscriptionManager {
    subscriptions: Mutex<Vec<Subscription>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks a subscription and returns a handle to it.
    pub fn add(&self, subscription: Subscription) -> Subscription {
        lock(&self.subscriptions).push(subscription.clone());
        subscription
    }

    pub fn add_all<I>(&self, subscriptions: I) -> Vec<Subscription>
    where
        I: IntoIterator<Item = Subscription>,
    {
        let subscriptions: Vec<Subscription> = subscriptions.into_iter().collect();
        lock(&self.subscriptions).extend(subscriptions.iter().cloned());
        subscriptions
    }

    /// Cancels every tracked subscription in insertion order, then forgets
    /// them. A second call finds an empty list.
    pub fn cancel_all(&self) {
        let tracked = std::mem::take(&mut *lock(&self.subscriptions));
        for subscription in tracked {
            subscription.cancel();
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.subscriptions).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.subscriptions).is_empty()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
