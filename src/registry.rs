//! Topic to subscription-handle bookkeeping.
//!
//! Pure map management: no I/O, no codec. The client mutates the registry
//! only while holding its session lock, which is what makes put/remove
//! atomic with respect to each other.

use crate::subscription::SubscriptionHandle;
use std::collections::HashMap;

/// Active subscriptions keyed by topic. At most one handle per topic.
#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    subs: HashMap<String, SubscriptionHandle>,
}

impl SubscriptionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert a handle for `topic`, returning the handle it replaced so the
    /// caller can retire it.
    pub(crate) fn put(
        &mut self,
        topic: &str,
        handle: SubscriptionHandle,
    ) -> Option<SubscriptionHandle> {
        self.subs.insert(topic.to_string(), handle)
    }

    /// Remove the handle for `topic`. Absence is not an error.
    pub(crate) fn remove(&mut self, topic: &str) -> Option<SubscriptionHandle> {
        self.subs.remove(topic)
    }

    /// Empty the registry, returning every handle for retirement.
    pub(crate) fn drain_all(&mut self) -> Vec<SubscriptionHandle> {
        self.subs.drain().map(|(_, handle)| handle).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.subs.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::MessageHandler;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn make_handle(topic: &str) -> SubscriptionHandle {
        let (_feed_tx, feed_rx) = mpsc::channel(1);
        let handler: MessageHandler = Arc::new(|_| {});
        SubscriptionHandle::spawn(topic.to_string(), feed_rx, handler)
    }

    #[tokio::test]
    async fn test_put_and_remove() {
        let mut registry = SubscriptionRegistry::new();
        assert!(registry.is_empty());

        assert!(registry.put("prices", make_handle("prices")).is_none());
        assert_eq!(registry.len(), 1);

        let removed = registry.remove("prices").expect("handle should be present");
        assert_eq!(removed.topic(), "prices");
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_remove_unknown_topic_is_none() {
        let mut registry = SubscriptionRegistry::new();
        assert!(registry.remove("never-subscribed").is_none());
    }

    #[tokio::test]
    async fn test_put_same_topic_returns_replaced_handle() {
        let mut registry = SubscriptionRegistry::new();
        assert!(registry.put("prices", make_handle("prices")).is_none());

        let replaced = registry.put("prices", make_handle("prices"));
        assert!(replaced.is_some(), "second put must surface the old handle");
        assert_eq!(registry.len(), 1, "still exactly one handle for the topic");
    }

    #[tokio::test]
    async fn test_drain_all_empties_registry() {
        let mut registry = SubscriptionRegistry::new();
        registry.put("a", make_handle("a"));
        registry.put("b", make_handle("b"));

        let drained = registry.drain_all();
        assert_eq!(drained.len(), 2);
        assert!(registry.is_empty());
    }
}
