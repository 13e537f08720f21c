//! In-process, topic-keyed publish/subscribe.
//!
//! Delivery is at-most-once and happens in the publisher's flow: [`EventBus::publish`] awaits each subscriber of the
//! topic in subscription order before returning. Nothing is queued or persisted; a subscriber that registers after
//! an event was published never sees it.
//!
//! Handlers can be async. The subscriber list is snapshotted before any handler runs, so a handler may subscribe or
//! unsubscribe (itself or others) without deadlocking. Such changes take effect from the next publish.
use std::{
    fmt::Debug,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
        PoisonError,
        RwLock,
    },
};

use log::*;

/// The topic on which canonical payment status updates are published.
pub const PAYMENT_STATUS_UPDATED: &str = "payment.status.updated";

pub type Handler<E> = Arc<dyn Fn(E) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

struct Subscriber<E> {
    handle: SubscriptionHandle,
    topic: String,
    handler: Handler<E>,
}

struct BusInner<E> {
    subscribers: RwLock<Vec<Subscriber<E>>>,
    next_handle: AtomicU64,
}

pub struct EventBus<E: Clone + Send + 'static> {
    inner: Arc<BusInner<E>>,
}

impl<E: Clone + Send + 'static> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<E: Clone + Send + 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone + Send + 'static> Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.inner.subscribers.read().map(|s| s.len()).unwrap_or_default();
        f.debug_struct("EventBus").field("subscribers", &count).finish()
    }
}

impl<E: Clone + Send + 'static> EventBus<E> {
    pub fn new() -> Self {
        let inner = BusInner { subscribers: RwLock::new(Vec::new()), next_handle: AtomicU64::new(1) };
        Self { inner: Arc::new(inner) }
    }

    /// Registers an async closure for `topic`.
    pub fn subscribe<F, Fut>(&self, topic: &str, f: F) -> SubscriptionHandle
    where
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: Handler<E> = Arc::new(move |e| Box::pin(f(e)) as Pin<Box<dyn Future<Output = ()> + Send>>);
        self.subscribe_handler(topic, handler)
    }

    pub fn subscribe_handler(&self, topic: &str, handler: Handler<E>) -> SubscriptionHandle {
        let handle = SubscriptionHandle(self.inner.next_handle.fetch_add(1, Ordering::Relaxed));
        let mut subscribers = self.inner.subscribers.write().unwrap_or_else(PoisonError::into_inner);
        subscribers.push(Subscriber { handle, topic: topic.to_string(), handler });
        debug!("📬️ New subscriber {handle:?} on '{topic}'");
        handle
    }

    /// Removes a subscription. Returns false if it was already gone, which is not an error.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let mut subscribers = self.inner.subscribers.write().unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|s| s.handle != handle);
        let removed = subscribers.len() < before;
        if removed {
            debug!("📬️ Subscription {handle:?} removed");
        }
        removed
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        let subscribers = self.inner.subscribers.read().unwrap_or_else(PoisonError::into_inner);
        subscribers.iter().filter(|s| s.topic == topic).count()
    }

    /// Delivers `event` to every current subscriber of `topic`, in subscription order, and returns how many handlers
    /// were called.
    pub async fn publish(&self, topic: &str, event: E) -> usize {
        let handlers = {
            let subscribers = self.inner.subscribers.read().unwrap_or_else(PoisonError::into_inner);
            subscribers.iter().filter(|s| s.topic == topic).map(|s| Arc::clone(&s.handler)).collect::<Vec<_>>()
        };
        if handlers.is_empty() {
            trace!("📬️ Nobody is listening on '{topic}'");
            return 0;
        }
        trace!("📬️ Publishing to {} subscriber(s) on '{topic}'", handlers.len());
        for handler in &handlers {
            (handler)(event.clone()).await;
        }
        handlers.len()
    }
}
