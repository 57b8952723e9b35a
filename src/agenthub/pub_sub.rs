//! In-memory pub/sub used to fan events out to subscribers.
//!
//! Each conversation owns one topic. Subscribing returns an opaque id;
//! unsubscribing an unknown id is a no-op, and subscribing the same callback
//! twice yields two independent subscriptions. Dispatch iterates a snapshot
//! of the subscriber map so no user code ever runs while the lock is held,
//! and invokes subscribers sequentially so callbacks for a given subscriber
//! never overlap.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Opaque identifier returned by [`PubSub::subscribe`].
pub type SubscriberId = String;

/// Callback fired whenever a service records activity (an event append).
/// The server installs one to keep its idle-time accounting honest while
/// background step loops are producing events.
pub type ActivityHook = Arc<dyn Fn() + Send + Sync>;

/// A callback registered with a conversation's topic.
///
/// `close` is invoked once during shutdown so buffering subscribers (such as
/// webhooks) can flush.
#[async_trait]
pub trait Subscriber<E: Send + Sync + 'static>: Send + Sync {
    async fn on_event(&self, event: &E);

    async fn close(&self) {}
}

/// An in-memory topic with subscribe/unsubscribe and dispatch.
pub struct PubSub<E: Send + Sync + 'static> {
    subscribers: RwLock<HashMap<SubscriberId, Arc<dyn Subscriber<E>>>>,
}

impl<E: Send + Sync + 'static> Default for PubSub<E> {
    fn default() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
        }
    }
}

impl<E: Send + Sync + 'static> PubSub<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber and return its id.
    pub async fn subscribe(&self, subscriber: Arc<dyn Subscriber<E>>) -> SubscriberId {
        let id = Uuid::new_v4().to_string();
        self.subscribers.write().await.insert(id.clone(), subscriber);
        id
    }

    /// Remove a subscriber. Unknown ids are ignored.
    pub async fn unsubscribe(&self, id: &str) -> bool {
        self.subscribers.write().await.remove(id).is_some()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Deliver `event` to every currently registered subscriber.
    ///
    /// Subscribers registered after this call starts do not receive the
    /// event. Delivery is sequential and in no particular order across
    /// subscribers.
    pub async fn dispatch(&self, event: &E) {
        let snapshot: Vec<Arc<dyn Subscriber<E>>> = {
            let guard = self.subscribers.read().await;
            guard.values().cloned().collect()
        };
        for subscriber in snapshot {
            subscriber.on_event(event).await;
        }
    }

    /// Close every subscriber, leaving the registry empty.
    pub async fn close(&self) {
        let drained: Vec<Arc<dyn Subscriber<E>>> = {
            let mut guard = self.subscribers.write().await;
            guard.drain().map(|(_, subscriber)| subscriber).collect()
        };
        for subscriber in drained {
            subscriber.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    struct Recorder {
        seen: Mutex<Vec<String>>,
        closed: AtomicUsize,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                closed: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Subscriber<String> for Recorder {
        async fn on_event(&self, event: &String) {
            self.seen.lock().await.push(event.clone());
        }

        async fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn dispatch_reaches_all_subscribers_in_order() {
        let topic: PubSub<String> = PubSub::new();
        let a = Recorder::new();
        let b = Recorder::new();
        topic.subscribe(a.clone()).await;
        topic.subscribe(b.clone()).await;

        topic.dispatch(&"one".to_string()).await;
        topic.dispatch(&"two".to_string()).await;

        assert_eq!(*a.seen.lock().await, vec!["one", "two"]);
        assert_eq!(*b.seen.lock().await, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn unsubscribe_unknown_id_is_a_noop() {
        let topic: PubSub<String> = PubSub::new();
        assert!(!topic.unsubscribe("nope").await);
    }

    #[tokio::test]
    async fn same_subscriber_twice_gets_two_ids() {
        let topic: PubSub<String> = PubSub::new();
        let recorder = Recorder::new();
        let first = topic.subscribe(recorder.clone()).await;
        let second = topic.subscribe(recorder.clone()).await;
        assert_ne!(first, second);
        assert_eq!(topic.subscriber_count().await, 2);

        topic.dispatch(&"x".to_string()).await;
        // Both registrations fire independently.
        assert_eq!(recorder.seen.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn unsubscribed_callbacks_stop_receiving() {
        let topic: PubSub<String> = PubSub::new();
        let recorder = Recorder::new();
        let id = topic.subscribe(recorder.clone()).await;
        topic.dispatch(&"before".to_string()).await;
        assert!(topic.unsubscribe(&id).await);
        topic.dispatch(&"after".to_string()).await;
        assert_eq!(*recorder.seen.lock().await, vec!["before"]);
    }

    #[tokio::test]
    async fn close_notifies_and_drains() {
        let topic: PubSub<String> = PubSub::new();
        let recorder = Recorder::new();
        topic.subscribe(recorder.clone()).await;
        topic.close().await;
        assert_eq!(recorder.closed.load(Ordering::SeqCst), 1);
        assert_eq!(topic.subscriber_count().await, 0);
    }
}
