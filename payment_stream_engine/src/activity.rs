//! Structured audit trail for connection and event lifecycle transitions.
//!
//! The [`ActivityLogger`] is a passive observer. The registry, the webhook ingester and the stream sessions call it
//! whenever something interesting happens; it turns each call into a `(message, context, source)` record and hands
//! it to an [`AuditSink`]. The default sink, [`LogAuditSink`], writes to the `pss::audit` log target.
use std::{fmt::Debug, sync::Arc};

use log::*;
use serde_json::{json, Value};

use crate::{
    registry::ConnectionId,
    status_types::{PaymentOrderId, StatusEvent},
    stream_session::StreamClosure,
    webhook::CallbackState,
};

pub const AUDIT_LOG_TARGET: &str = "pss::audit";

/// Receives audit records. Implementations must not block; they are called inline on the hot path.
pub trait AuditSink: Send + Sync + Debug {
    fn record(&self, message: &str, context: Value, source: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn record(&self, message: &str, context: Value, source: &str) {
        info!(target: AUDIT_LOG_TARGET, "{source}: {message} {context}");
    }
}

#[derive(Debug, Clone)]
pub struct ActivityLogger {
    sink: Arc<dyn AuditSink>,
}

impl Default for ActivityLogger {
    fn default() -> Self {
        Self::new(Arc::new(LogAuditSink))
    }
}

impl ActivityLogger {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    pub fn connection_established(&self, order_id: &PaymentOrderId, id: ConnectionId, bucket_size: usize) {
        self.sink.record(
            "Connection established",
            json!({ "paymentOrderId": order_id, "connectionId": id.to_string(), "bucketSize": bucket_size }),
            "ConnectionRegistry",
        );
    }

    pub fn connection_removed(&self, order_id: &PaymentOrderId, id: ConnectionId, bucket_size: usize) {
        self.sink.record(
            "Connection removed",
            json!({ "paymentOrderId": order_id, "connectionId": id.to_string(), "bucketSize": bucket_size }),
            "ConnectionRegistry",
        );
    }

    pub fn write_failed(&self, order_id: &PaymentOrderId, id: ConnectionId, reason: &str) {
        self.sink.record(
            "Write to connection failed",
            json!({ "paymentOrderId": order_id, "connectionId": id.to_string(), "error": reason }),
            "ConnectionRegistry",
        );
    }

    pub fn no_subscribers(&self, event: &StatusEvent) {
        self.sink.record(
            "No subscribers for status update",
            json!({ "paymentOrderId": event.payment_order_id(), "status": event.status() }),
            "ConnectionRegistry",
        );
    }

    pub fn event_broadcast(&self, event: &StatusEvent, delivered: usize, failed: usize) {
        self.sink.record(
            "Status update broadcast",
            json!({
                "paymentOrderId": event.payment_order_id(),
                "status": event.status(),
                "delivered": delivered,
                "failed": failed,
            }),
            "ConnectionRegistry",
        );
    }

    pub fn bucket_closed(&self, event: &StatusEvent, closed: usize) {
        self.sink.record(
            "Terminal status closed all streams",
            json!({ "paymentOrderId": event.payment_order_id(), "status": event.status(), "closed": closed }),
            "ConnectionRegistry",
        );
    }

    pub fn webhook_received(&self, payload: &[u8], checksum: Option<&str>) {
        self.sink.record(
            "Webhook received",
            json!({
                "payload": String::from_utf8_lossy(payload),
                "checksumProvided": checksum.is_some(),
            }),
            "WebhookIngester",
        );
    }

    pub fn webhook_verification(&self, verified: bool) {
        self.sink.record("Webhook verification", json!({ "verified": verified }), "WebhookIngester");
    }

    pub fn webhook_outcome(&self, state: CallbackState, event: Option<&StatusEvent>, reason: Option<&str>) {
        self.sink.record(
            "Webhook processed",
            json!({
                "state": state.to_string(),
                "paymentOrderId": event.map(|e| e.payment_order_id()),
                "status": event.map(|e| e.status()),
                "reason": reason,
            }),
            "WebhookIngester",
        );
    }

    pub fn stream_opened(&self, order_id: &PaymentOrderId, id: ConnectionId) {
        self.sink.record(
            "Stream opened",
            json!({ "paymentOrderId": order_id, "connectionId": id.to_string() }),
            "StreamHandler",
        );
    }

    pub fn stream_closed(&self, order_id: &PaymentOrderId, id: ConnectionId, closure: StreamClosure) {
        self.sink.record(
            "Stream closed",
            json!({ "paymentOrderId": order_id, "connectionId": id.to_string(), "closure": closure.to_string() }),
            "StreamHandler",
        );
    }
}
