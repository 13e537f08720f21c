//! Payment Stream Engine
//!
//! The engine contains everything needed to turn an authenticated payment-provider callback into live updates on
//! every open client stream that is watching the affected payment order. It is transport-agnostic: the server crate
//! supplies the HTTP layer, the engine supplies the moving parts.
//!
//! The library is divided into a handful of pieces:
//! 1. Integrity checks ([`mod@integrity`]). HMAC-SHA256 checksums for inbound webhooks and RSA encryption for
//!    payloads we send to the provider.
//! 2. The event bus ([`mod@events`]). An in-process, at-most-once pub-sub channel keyed by topic. Status updates
//!    flow through the `payment.status.updated` topic.
//! 3. The connection registry ([`mod@registry`]). Holds every open output stream, bucketed by payment order id, and
//!    fans status events out to them. Terminal statuses close the whole bucket.
//! 4. Webhook ingestion ([`mod@webhook`]) and the stream session lifecycle ([`mod@stream_session`]).
//!
//! Lifecycle transitions are reported to an [`ActivityLogger`], which forwards structured records to whatever
//! [`AuditSink`] the host application provides.
pub mod activity;
pub mod events;
pub mod integrity;
pub mod registry;
pub mod status_types;
pub mod stream_session;
pub mod traits;
pub mod webhook;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use activity::{ActivityLogger, AuditSink, LogAuditSink};
pub use events::{EventBus, StatusUpdate, StatusUpdateProducer, StatusUpdateQueue, PAYMENT_STATUS_UPDATED};
pub use integrity::{EncryptionError, IntegrityVerifier};
pub use registry::{CloseReason, ConnectionId, ConnectionRegistry, OutputHandle, SseReceiver, SseSink, TransportWriteError};
pub use status_types::{PaymentOrderId, PaymentStatus, StatusEvent, StreamMessage};
pub use stream_session::{StreamClosure, StreamSession};
pub use traits::{AllowAllOrders, OrderLookup, OrderLookupError};
pub use webhook::{CallbackState, IngestOutcome, WebhookIngester};
