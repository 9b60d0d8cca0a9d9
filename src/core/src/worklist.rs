//! Growable publish/subscribe worklist
//!
//! Connects discovery producers (role listing, log search, static lists) to
//! consumers (assumption, reporting). A consumer that attaches mid-scan
//! receives the backlog and every later item, each exactly once.
//!
//! `add` and `walk` both take their snapshot (subscribers to notify, items to
//! replay) while holding the same lock, and deliver outside of it. An item
//! added concurrently with a `walk` registration is therefore either in the
//! walker's item snapshot or `add` sees the walker in its subscriber snapshot,
//! never both and never neither.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Items with a stable identity used for deduplication
pub trait Identifiable {
    fn id(&self) -> String;
}

type Callback<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Handle returned by [`PubSubWorklist::walk`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Inner<T> {
    seen: HashSet<String>,
    items: Vec<T>,
    subscribers: Vec<(SubscriptionId, Callback<T>)>,
    next_subscription: u64,
}

/// Race-safe collection delivering every item to every subscriber once
pub struct PubSubWorklist<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> PubSubWorklist<T>
where
    T: Identifiable + Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                seen: HashSet::new(),
                items: Vec::with_capacity(100),
                subscribers: Vec::new(),
                next_subscription: 0,
            }),
        }
    }

    /// Insert `item` and notify every current subscriber
    ///
    /// Returns `false` without notifying anyone if an item with the same ID
    /// was already accepted.
    pub fn add(&self, item: T) -> bool {
        let subscribers: Vec<Callback<T>> = {
            let mut inner = self.inner.lock();
            if !inner.seen.insert(item.id()) {
                return false;
            }
            inner.items.push(item.clone());
            inner.subscribers.iter().map(|(_, cb)| cb.clone()).collect()
        };

        for subscriber in subscribers {
            subscriber(item.clone());
        }
        true
    }

    /// Register `callback` for future items and replay every existing item
    pub fn walk<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let callback: Callback<T> = Arc::new(callback);
        let (id, backlog) = {
            let mut inner = self.inner.lock();
            let id = SubscriptionId(inner.next_subscription);
            inner.next_subscription += 1;
            inner.subscribers.push((id, callback.clone()));
            (id, inner.items.clone())
        };

        for item in backlog {
            callback(item);
        }
        id
    }

    /// Detach a subscriber; items added afterwards are not delivered to it
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(sid, _)| *sid != id);
        inner.subscribers.len() != before
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().seen.contains(id)
    }

    /// Snapshot of every accepted item in insertion order
    pub fn items(&self) -> Vec<T> {
        self.inner.lock().items.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}

impl<T> Default for PubSubWorklist<T>
where
    T: Identifiable + Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
