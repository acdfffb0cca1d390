//! Topic-keyed subscriber registry.
//!
//! Topics are plain client-side strings; nothing here talks to the server.
//! Handlers are kept in subscription order and removed by the
//! [`SubscriptionId`] handed out at subscribe time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Handle identifying one registered handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

impl SubscriptionId {
    fn next() -> Self {
        SubscriptionId(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed))
    }
}

/// Lock a mutex, recovering the data if a handler panicked while holding it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared, synchronously invoked callback
pub type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

pub struct TopicRegistry<T> {
    topics: HashMap<String, Vec<(SubscriptionId, Handler<T>)>>,
}

impl<T> Default for TopicRegistry<T> {
    fn default() -> Self {
        TopicRegistry {
            topics: HashMap::new(),
        }
    }
}

impl<T> TopicRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, topic: &str, handler: Handler<T>) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.topics
            .entry(topic.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    /// Remove one handler. Returns false if it was not registered under `topic`.
    pub fn unsubscribe(&mut self, topic: &str, id: SubscriptionId) -> bool {
        let Some(handlers) = self.topics.get_mut(topic) else {
            return false;
        };

        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        let removed = handlers.len() != before;

        if handlers.is_empty() {
            self.topics.remove(topic);
        }
        removed
    }

    /// Snapshot of the handlers for `topic`, in subscription order.
    /// Callers invoke them after releasing any lock around the registry and
    /// skip ids that [`TopicRegistry::contains`] no longer reports.
    pub fn handlers(&self, topic: &str) -> Vec<(SubscriptionId, Handler<T>)> {
        self.topics
            .get(topic)
            .map(|handlers| {
                handlers
                    .iter()
                    .map(|(id, h)| (*id, Arc::clone(h)))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn contains(&self, topic: &str, id: SubscriptionId) -> bool {
        self.topics
            .get(topic)
            .is_some_and(|handlers| handlers.iter().any(|(existing, _)| *existing == id))
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn clear(&mut self) {
        self.topics.clear();
    }
}
