//! Queued status-update contract for the order-processing side of the application.
//!
//! Components that learn about a payment's status out-of-band (e.g. an order reconciliation job) don't need a handle
//! on the event bus. They hold a cheap, cloneable [`StatusUpdateProducer`] and submit [`StatusUpdate`]s; the
//! [`StatusUpdateQueue`] drains them, in submission order, onto the `payment.status.updated` topic.
//!
//! The queue shuts itself down once every producer has been dropped.
use log::*;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{
    events::{EventBus, PAYMENT_STATUS_UPDATED},
    status_types::{PaymentOrderId, PaymentStatus, StatusEvent},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub payment_order_id: PaymentOrderId,
    pub status: PaymentStatus,
    #[serde(default)]
    pub message: Option<String>,
}

impl StatusUpdate {
    pub fn new(payment_order_id: PaymentOrderId, status: PaymentStatus) -> Self {
        Self { payment_order_id, status, message: None }
    }

    pub fn with_message<S: Into<String>>(mut self, message: S) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn into_event(self) -> StatusEvent {
        match self.message {
            Some(m) => StatusEvent::with_message(self.payment_order_id, self.status, m),
            None => StatusEvent::new(self.payment_order_id, self.status),
        }
    }
}

/// Publishes a status update straight onto the bus, in the caller's flow. Returns the number of subscribers reached.
pub async fn notify_status(bus: &EventBus<StatusEvent>, update: StatusUpdate) -> usize {
    let event = update.into_event();
    debug!("📬️ Status update for {}", event);
    bus.publish(PAYMENT_STATUS_UPDATED, event).await
}

pub struct StatusUpdateQueue {
    listener: mpsc::Receiver<StatusUpdate>,
    sender: mpsc::Sender<StatusUpdate>,
    bus: EventBus<StatusEvent>,
}

impl StatusUpdateQueue {
    pub fn new(buffer_size: usize, bus: EventBus<StatusEvent>) -> Self {
        let (sender, receiver) = mpsc::channel(buffer_size.max(1));
        Self { listener: receiver, sender, bus }
    }

    pub fn producer(&self) -> StatusUpdateProducer {
        StatusUpdateProducer::new(self.sender.clone())
    }

    /// Runs until every producer is dropped. Updates are published one at a time so that per-order ordering is
    /// preserved all the way to the client streams.
    pub async fn run(mut self) {
        debug!("📬️ Starting status update queue");
        // drop the internal sender so that when the last producer is dropped, we can automatically shut down
        drop(self.sender);
        while let Some(update) = self.listener.recv().await {
            trace!("📬️ Draining status update for {}", update.payment_order_id);
            notify_status(&self.bus, update).await;
        }
        debug!("📬️ Status update queue has shut down");
    }
}

#[derive(Clone, Debug)]
pub struct StatusUpdateProducer {
    sender: mpsc::Sender<StatusUpdate>,
}

impl StatusUpdateProducer {
    pub fn new(sender: mpsc::Sender<StatusUpdate>) -> Self {
        Self { sender }
    }

    pub async fn submit(&self, update: StatusUpdate) {
        if let Err(e) = self.sender.send(update).await {
            error!("📬️ Failed to queue status update: {e}");
        }
    }
}
