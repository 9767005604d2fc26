//! Change subscriptions.
//!
//! Subscribers register a callback per collection and receive the complete
//! document array whenever the locally visible state of that collection
//! changes: on optimistic staging and on every cache refresh that brought new
//! remote content.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::document::Document;

/// Callback invoked with the full collection content.
pub type ChangeCallback = Arc<dyn Fn(&[Document]) + Send + Sync>;

/// Handle returned by [`SubscriberRegistry::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Subscriber {
    id: SubscriptionId,
    callback: ChangeCallback,
}

/// Per-collection callback table.
#[derive(Default)]
pub struct SubscriberRegistry {
    next_id: AtomicU64,
    subscribers: RwLock<HashMap<String, Vec<Subscriber>>>,
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subscribers = self.subscribers.read();
        let counts: HashMap<&str, usize> = subscribers
            .iter()
            .map(|(collection, subs)| (collection.as_str(), subs.len()))
            .collect();
        f.debug_struct("SubscriberRegistry")
            .field("subscribers", &counts)
            .finish()
    }
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, collection: &str, callback: ChangeCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.subscribers
            .write()
            .entry(collection.to_string())
            .or_default()
            .push(Subscriber { id, callback });
        id
    }

    /// Removes a subscription. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let mut removed = false;
        subscribers.retain(|_, subs| {
            let before = subs.len();
            subs.retain(|sub| sub.id != id);
            removed |= subs.len() != before;
            !subs.is_empty()
        });
        removed
    }

    pub fn subscriber_count(&self, collection: &str) -> usize {
        self.subscribers
            .read()
            .get(collection)
            .map_or(0, Vec::len)
    }

    /// Invokes every callback registered for `collection`.
    ///
    /// Callbacks run on the caller's task after the registry lock is
    /// released, so a callback may subscribe or unsubscribe.
    pub fn notify(&self, collection: &str, documents: &[Document]) {
        let callbacks: Vec<ChangeCallback> = match self.subscribers.read().get(collection) {
            Some(subs) => subs.iter().map(|sub| Arc::clone(&sub.callback)).collect(),
            None => return,
        };
        for callback in callbacks {
            callback(documents);
        }
    }
}
