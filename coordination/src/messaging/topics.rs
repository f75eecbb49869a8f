//! Topic subscriptions with exact and prefix-pattern matching
//!
//! Patterns ending in `*` match any topic sharing the prefix; anything else
//! is an exact match. Direct-topic handlers are always delivered before
//! pattern handlers, registration order within each group.

use std::sync::{Arc, Mutex, Weak};

use futures::future::BoxFuture;
use tracing::debug;

use super::types::BusMessage;

/// Handler invoked for every matching published message
pub type TopicHandler =
    Arc<dyn Fn(BusMessage) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Check whether a subscription pattern matches a concrete topic
///
/// A trailing `*` matches any topic sharing the prefix; without it the
/// pattern must equal the topic exactly.
pub fn pattern_matches(pattern: &str, topic: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => topic.starts_with(prefix),
        None => pattern == topic,
    }
}

struct SubscriptionEntry {
    id: u64,
    key: String,
    handler: TopicHandler,
}

struct SubscriptionsInner {
    next_id: u64,
    direct: Vec<SubscriptionEntry>,
    patterns: Vec<SubscriptionEntry>,
}

/// The live set of topic subscriptions
pub(crate) struct TopicSubscriptions {
    inner: Mutex<SubscriptionsInner>,
}

impl TopicSubscriptions {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(SubscriptionsInner {
                next_id: 0,
                direct: Vec::new(),
                patterns: Vec::new(),
            }),
        }
    }

    fn insert(&self, key: String, handler: TopicHandler, pattern: bool) -> u64 {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let id = inner.next_id;
        inner.next_id += 1;

        let entry = SubscriptionEntry { id, key, handler };
        if pattern {
            inner.patterns.push(entry);
        } else {
            inner.direct.push(entry);
        }
        id
    }

    pub(crate) fn subscribe(&self, topic: &str, handler: TopicHandler) -> u64 {
        self.insert(topic.to_string(), handler, false)
    }

    pub(crate) fn subscribe_pattern(&self, pattern: &str, handler: TopicHandler) -> u64 {
        self.insert(pattern.to_string(), handler, true)
    }

    /// Remove a subscription by id; a no-op when already removed
    pub(crate) fn remove(&self, id: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.direct.retain(|e| e.id != id);
        inner.patterns.retain(|e| e.id != id);
    }

    /// Handlers matching a topic: direct matches first, then pattern
    /// matches, registration order within each group
    pub(crate) fn handlers_for(&self, topic: &str) -> Vec<(u64, TopicHandler)> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut matched = Vec::new();

        for entry in &inner.direct {
            if entry.key == topic {
                matched.push((entry.id, Arc::clone(&entry.handler)));
            }
        }
        for entry in &inner.patterns {
            if pattern_matches(&entry.key, topic) {
                matched.push((entry.id, Arc::clone(&entry.handler)));
            }
        }
        matched
    }

    pub(crate) fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.direct.len() + inner.patterns.len()
    }
}

/// Handle to a topic subscription
///
/// Unsubscribing is explicit and idempotent; dropping the handle leaves the
/// subscription in place.
pub struct Subscription {
    id: u64,
    subscriptions: Weak<TopicSubscriptions>,
}

impl Subscription {
    pub(crate) fn new(id: u64, subscriptions: Weak<TopicSubscriptions>) -> Self {
        Self { id, subscriptions }
    }

    /// Subscription id, unique within the owning bus
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remove this subscription; calling again is a no-op
    pub fn unsubscribe(&self) {
        if let Some(subscriptions) = self.subscriptions.upgrade() {
            subscriptions.remove(self.id);
            debug!(subscription = self.id, "Unsubscribed");
        }
    }
}
