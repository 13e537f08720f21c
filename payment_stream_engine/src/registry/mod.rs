//! The live mapping from payment order id to the client streams watching it.
//!
//! Locking discipline: a global mutex guards the map of buckets and is only ever held for a lookup or an
//! insert/remove, never across an `.await`. Each bucket has its own async mutex; everything that mutates a bucket
//! (register, deregister, broadcast) takes it. Broadcasts for the same order are therefore serialized in publish
//! order, while different orders proceed independently.
//!
//! A bucket that has been emptied (terminal status, or its last connection went away) is flagged as retired before it
//! is unlinked from the map. Anyone who fetched the bucket before it was unlinked sees the flag and either gives up
//! (deregister, broadcast) or retries against a fresh bucket (register).
mod output;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
        Mutex,
        PoisonError,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use log::*;
pub use output::{CloseReason, ConnectionId, OutputHandle, SseReceiver, SseSink, TransportWriteError};
use tokio::sync::Mutex as AsyncMutex;

use crate::{
    activity::ActivityLogger,
    events::{EventBus, SubscriptionHandle, PAYMENT_STATUS_UPDATED},
    status_types::{PaymentOrderId, StatusEvent, StreamMessage},
};

pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct Connection<H: OutputHandle> {
    pub id: ConnectionId,
    pub payment_order_id: PaymentOrderId,
    pub handle: Arc<H>,
    pub connected_at: DateTime<Utc>,
}

impl<H: OutputHandle> Clone for Connection<H> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            payment_order_id: self.payment_order_id.clone(),
            handle: Arc::clone(&self.handle),
            connected_at: self.connected_at,
        }
    }
}

struct Bucket<H: OutputHandle> {
    connections: Vec<Connection<H>>,
    retired: bool,
}

impl<H: OutputHandle> Default for Bucket<H> {
    fn default() -> Self {
        Self { connections: Vec::new(), retired: false }
    }
}

type SharedBucket<H> = Arc<AsyncMutex<Bucket<H>>>;

/// What happened during a single [`ConnectionRegistry::broadcast`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
    /// Connections closed because the status was terminal.
    pub closed: usize,
}

pub struct ConnectionRegistry<H: OutputHandle> {
    buckets: Arc<Mutex<HashMap<PaymentOrderId, SharedBucket<H>>>>,
    active: Arc<AtomicUsize>,
    write_timeout: Duration,
    logger: ActivityLogger,
}

impl<H: OutputHandle> Clone for ConnectionRegistry<H> {
    fn clone(&self) -> Self {
        Self {
            buckets: Arc::clone(&self.buckets),
            active: Arc::clone(&self.active),
            write_timeout: self.write_timeout,
            logger: self.logger.clone(),
        }
    }
}

impl<H: OutputHandle> ConnectionRegistry<H> {
    pub fn new(write_timeout: Duration, logger: ActivityLogger) -> Self {
        Self { buckets: Arc::new(Mutex::new(HashMap::new())), active: Arc::new(AtomicUsize::new(0)), write_timeout, logger }
    }

    pub fn logger(&self) -> &ActivityLogger {
        &self.logger
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// Routes every event published on `payment.status.updated` to [`Self::broadcast`].
    pub fn attach(&self, bus: &EventBus<StatusEvent>) -> SubscriptionHandle {
        let registry = self.clone();
        bus.subscribe(PAYMENT_STATUS_UPDATED, move |event: StatusEvent| {
            let registry = registry.clone();
            async move {
                registry.broadcast(event).await;
            }
        })
    }

    /// Adds `handle` to the bucket for `order_id` and arms a watcher that deregisters it when the transport closes.
    pub async fn register(&self, order_id: PaymentOrderId, handle: Arc<H>) -> Connection<H> {
        let connection = Connection {
            id: handle.id(),
            payment_order_id: order_id.clone(),
            handle: Arc::clone(&handle),
            connected_at: Utc::now(),
        };
        let bucket_size = loop {
            let bucket = self.bucket_or_insert(&order_id);
            let mut guard = bucket.lock().await;
            if guard.retired {
                drop(guard);
                self.unlink_bucket(&order_id, &bucket);
                continue;
            }
            guard.connections.push(connection.clone());
            // Counted under the bucket lock, so a broadcast that drops this connection always sees it counted first
            self.active.fetch_add(1, Ordering::SeqCst);
            break guard.connections.len();
        };
        debug!("📡️ {} registered for {order_id}. {bucket_size} viewer(s) on this order.", connection.id);
        self.logger.connection_established(&order_id, connection.id, bucket_size);

        let registry = self.clone();
        let id = connection.id;
        tokio::spawn(async move {
            handle.closed().await;
            trace!("📡️ Transport for {id} closed");
            registry.deregister(&order_id, id).await;
        });
        connection
    }

    /// Removes a connection from its bucket, dropping the bucket once empty. Returns false if the connection was not
    /// registered (anymore), which is not an error.
    pub async fn deregister(&self, order_id: &PaymentOrderId, id: ConnectionId) -> bool {
        let Some(bucket) = self.bucket(order_id) else {
            return false;
        };
        let mut guard = bucket.lock().await;
        let removed = self.remove_connection(&mut guard, order_id, id);
        if guard.connections.is_empty() && !guard.retired {
            guard.retired = true;
            drop(guard);
            self.unlink_bucket(order_id, &bucket);
            debug!("📡️ No viewers left on {order_id}");
        }
        removed
    }

    /// Writes `event` to every connection watching its order.
    ///
    /// Each write is bounded by the registry's write timeout and runs concurrently with its siblings. Connections
    /// whose write fails or times out are closed and removed; the others are unaffected. If the status is terminal,
    /// every remaining connection is closed and the bucket is removed.
    pub async fn broadcast(&self, event: StatusEvent) -> BroadcastReport {
        let order_id = event.payment_order_id().clone();
        let mut report = BroadcastReport::default();
        let Some(bucket) = self.bucket(&order_id) else {
            debug!("📡️ No subscribers for {event}");
            self.logger.no_subscribers(&event);
            return report;
        };
        let mut guard = bucket.lock().await;
        if guard.retired {
            debug!("📡️ No subscribers for {event}");
            self.logger.no_subscribers(&event);
            return report;
        }

        let frame = StreamMessage::from(event.clone()).to_sse_frame();
        let write_timeout = self.write_timeout;
        let writes = guard.connections.iter().map(|c| {
            let frame = frame.clone();
            async move {
                let result = match tokio::time::timeout(write_timeout, c.handle.write(frame)).await {
                    Ok(r) => r,
                    Err(_) => Err(TransportWriteError::TimedOut(write_timeout)),
                };
                (c.id, result)
            }
        });
        let results = join_all(writes).await;

        for (id, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!("📡️ Could not deliver {event} to {id}. {e} Dropping the connection.");
                    self.logger.write_failed(&order_id, id, &e.to_string());
                    if let Some(c) = guard.connections.iter().find(|c| c.id == id) {
                        c.handle.close(CloseReason::WriteFailure);
                    }
                    self.remove_connection(&mut guard, &order_id, id);
                },
            }
        }
        info!("📡️ {event} delivered to {} viewer(s), {} failed", report.delivered, report.failed);
        self.logger.event_broadcast(&event, report.delivered, report.failed);

        if event.is_terminal() {
            let remaining = std::mem::take(&mut guard.connections);
            for c in &remaining {
                c.handle.close(CloseReason::TerminalStatus);
            }
            report.closed = remaining.len();
            self.active.fetch_sub(remaining.len(), Ordering::SeqCst);
            info!("📡️ {event} is terminal. Closed {} stream(s).", report.closed);
            self.logger.bucket_closed(&event, report.closed);
        }
        if guard.connections.is_empty() {
            guard.retired = true;
            drop(guard);
            self.unlink_bucket(&order_id, &bucket);
        }
        report
    }

    /// Sum of all bucket sizes. Observability only; may lag in-flight mutations.
    pub fn active_connection_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn has_bucket(&self, order_id: &PaymentOrderId) -> bool {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner).contains_key(order_id)
    }

    pub async fn connection_count_for(&self, order_id: &PaymentOrderId) -> usize {
        match self.bucket(order_id) {
            Some(bucket) => bucket.lock().await.connections.len(),
            None => 0,
        }
    }

    fn remove_connection(&self, bucket: &mut Bucket<H>, order_id: &PaymentOrderId, id: ConnectionId) -> bool {
        let before = bucket.connections.len();
        bucket.connections.retain(|c| c.id != id);
        let removed = bucket.connections.len() < before;
        if removed {
            self.active.fetch_sub(1, Ordering::SeqCst);
            debug!("📡️ {id} removed from {order_id}");
            self.logger.connection_removed(order_id, id, bucket.connections.len());
        }
        removed
    }

    fn bucket(&self, order_id: &PaymentOrderId) -> Option<SharedBucket<H>> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner).get(order_id).cloned()
    }

    fn bucket_or_insert(&self, order_id: &PaymentOrderId) -> SharedBucket<H> {
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let bucket = buckets.entry(order_id.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(Bucket::default())));
        Arc::clone(bucket)
    }

    // Only unlinks the exact bucket given; a fresh bucket registered under the same id in the meantime is left alone.
    fn unlink_bucket(&self, order_id: &PaymentOrderId, bucket: &SharedBucket<H>) {
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        if buckets.get(order_id).is_some_and(|b| Arc::ptr_eq(b, bucket)) {
            buckets.remove(order_id);
        }
    }
}
