//! Turns provider callbacks into canonical status events.
//!
//! Each callback goes through `RECEIVED → VERIFIED → PUBLISHED`, or `RECEIVED → REJECTED`. A callback is rejected if
//! its checksum is missing or wrong, or if a correctly signed body can't be understood. Rejected callbacks never
//! reach the event bus.
//!
//! Provider response codes map to statuses as follows:
//!
//! | code        | status    |
//! |-------------|-----------|
//! | `00`        | SUCCESS   |
//! | `01`, `09`  | PENDING   |
//! | `24`        | CANCELLED |
//! | anything else | FAILED  |
use std::fmt::Display;

use log::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    activity::ActivityLogger,
    events::{EventBus, PAYMENT_STATUS_UPDATED},
    integrity::IntegrityVerifier,
    status_types::{PaymentOrderId, PaymentStatus, StatusEvent},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackState {
    Received,
    Verified,
    Published,
    Rejected,
}

impl Display for CallbackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallbackState::Received => write!(f, "RECEIVED"),
            CallbackState::Verified => write!(f, "VERIFIED"),
            CallbackState::Published => write!(f, "PUBLISHED"),
            CallbackState::Rejected => write!(f, "REJECTED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectionReason {
    #[error("No checksum was provided.")]
    MissingChecksum,
    #[error("The checksum does not match the payload.")]
    ChecksumMismatch,
    #[error("The payload could not be read. {0}")]
    MalformedPayload(String),
}

/// The body the provider posts to us.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCallback {
    #[serde(alias = "orderId")]
    pub payment_order_id: PaymentOrderId,
    pub response_code: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub state: CallbackState,
    pub event: Option<StatusEvent>,
    pub rejection: Option<RejectionReason>,
    /// How many bus subscribers the event reached. Zero for rejected callbacks.
    pub subscribers: usize,
}

impl IngestOutcome {
    fn rejected(reason: RejectionReason) -> Self {
        Self { state: CallbackState::Rejected, event: None, rejection: Some(reason), subscribers: 0 }
    }

    pub fn is_published(&self) -> bool {
        self.state == CallbackState::Published
    }
}

pub fn map_response_code(code: &str) -> PaymentStatus {
    match code.trim() {
        "00" => PaymentStatus::Success,
        "01" | "09" => PaymentStatus::Pending,
        "24" => PaymentStatus::Cancelled,
        other => {
            debug!("🪝️ Response code '{other}' maps to FAILED");
            PaymentStatus::Failed
        },
    }
}

#[derive(Debug, Clone)]
pub struct WebhookIngester {
    verifier: IntegrityVerifier,
    bus: EventBus<StatusEvent>,
    logger: ActivityLogger,
}

impl WebhookIngester {
    pub fn new(verifier: IntegrityVerifier, bus: EventBus<StatusEvent>, logger: ActivityLogger) -> Self {
        Self { verifier, bus, logger }
    }

    /// Processes one callback. Never fails: every problem is expressed as a `REJECTED` outcome, and the caller is
    /// expected to acknowledge the provider either way.
    pub async fn ingest(&self, payload: &[u8], checksum: Option<&str>) -> IngestOutcome {
        let state = CallbackState::Received;
        trace!("🪝️ Callback {state}: {} bytes", payload.len());
        self.logger.webhook_received(payload, checksum);

        let verified = checksum.is_some_and(|c| self.verifier.verify(payload, c));
        self.logger.webhook_verification(verified);
        if !verified {
            let reason = match checksum {
                None => RejectionReason::MissingChecksum,
                Some(_) => RejectionReason::ChecksumMismatch,
            };
            warn!("🪝️ Rejecting webhook callback. {reason}");
            return self.finish(IngestOutcome::rejected(reason));
        }
        let state = CallbackState::Verified;
        trace!("🪝️ Callback {state}");

        let callback = match serde_json::from_slice::<ProviderCallback>(payload) {
            Ok(cb) if cb.payment_order_id.is_empty() => {
                warn!("🪝️ Verified callback has no payment order id. Rejecting.");
                return self.finish(IngestOutcome::rejected(RejectionReason::MalformedPayload(
                    "paymentOrderId is empty".into(),
                )));
            },
            Ok(cb) => cb,
            Err(e) => {
                warn!("🪝️ Verified callback could not be parsed. {e}");
                return self.finish(IngestOutcome::rejected(RejectionReason::MalformedPayload(e.to_string())));
            },
        };

        let status = map_response_code(&callback.response_code);
        let event = match callback.message {
            Some(m) => StatusEvent::with_message(callback.payment_order_id, status, m),
            None => StatusEvent::new(callback.payment_order_id, status),
        };
        info!("🪝️ Provider reported {event} (code {})", callback.response_code);
        let subscribers = self.bus.publish(PAYMENT_STATUS_UPDATED, event.clone()).await;
        self.finish(IngestOutcome { state: CallbackState::Published, event: Some(event), rejection: None, subscribers })
    }

    fn finish(&self, outcome: IngestOutcome) -> IngestOutcome {
        let reason = outcome.rejection.as_ref().map(|r| r.to_string());
        self.logger.webhook_outcome(outcome.state, outcome.event.as_ref(), reason.as_deref());
        outcome
    }
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Mutex};

    use pss_common::Secret;

    use super::*;
    use crate::{integrity::compute_checksum, test_utils::MemoryAuditSink};

    const SECRET: &str = "provider-shared-secret";

    fn setup() -> (WebhookIngester, Arc<Mutex<Vec<StatusEvent>>>, Arc<MemoryAuditSink>) {
        let _ = env_logger::try_init();
        let bus = EventBus::<StatusEvent>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s2 = Arc::clone(&seen);
        bus.subscribe(PAYMENT_STATUS_UPDATED, move |e| {
            let seen = Arc::clone(&s2);
            async move { seen.lock().unwrap().push(e) }
        });
        let audit = Arc::new(MemoryAuditSink::default());
        let verifier = IntegrityVerifier::new(Secret::new(SECRET.to_string()));
        (WebhookIngester::new(verifier, bus, ActivityLogger::new(audit.clone())), seen, audit)
    }

    fn body(order: &str, code: &str) -> Vec<u8> {
        format!(r#"{{"paymentOrderId":"{order}","responseCode":"{code}","message":"from provider"}}"#).into_bytes()
    }

    fn sign(payload: &[u8]) -> String {
        compute_checksum(payload, SECRET.as_bytes())
    }

    #[test]
    fn response_codes() {
        assert_eq!(map_response_code("00"), PaymentStatus::Success);
        assert_eq!(map_response_code("01"), PaymentStatus::Pending);
        assert_eq!(map_response_code("09"), PaymentStatus::Pending);
        assert_eq!(map_response_code("24"), PaymentStatus::Cancelled);
        assert_eq!(map_response_code("51"), PaymentStatus::Failed);
        assert_eq!(map_response_code(""), PaymentStatus::Failed);
        assert_eq!(map_response_code("banana"), PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn valid_callback_is_published() {
        let (ingester, seen, audit) = setup();
        let payload = body("ord_1", "00");
        let outcome = ingester.ingest(&payload, Some(&sign(&payload))).await;
        assert!(outcome.is_published());
        assert_eq!(outcome.subscribers, 1);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].payment_order_id().as_str(), "ord_1");
        assert_eq!(seen[0].status(), PaymentStatus::Success);
        assert_eq!(seen[0].message(), Some("from provider"));
        let outcome_record = &audit.with_message("Webhook processed")[0];
        assert_eq!(outcome_record.context["state"], "PUBLISHED");
        assert_eq!(outcome_record.context["status"], "SUCCESS");
    }

    #[tokio::test]
    async fn unknown_code_is_published_as_failed() {
        let (ingester, seen, _) = setup();
        let payload = body("ord_5", "99");
        let outcome = ingester.ingest(&payload, Some(&sign(&payload))).await;
        assert!(outcome.is_published());
        assert_eq!(seen.lock().unwrap()[0].status(), PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn bad_checksum_is_rejected() {
        let (ingester, seen, audit) = setup();
        let payload = body("ord_2", "00");
        let mut checksum = sign(&payload);
        checksum.replace_range(0..2, if checksum.starts_with("00") { "11" } else { "00" });
        let outcome = ingester.ingest(&payload, Some(&checksum)).await;
        assert_eq!(outcome.state, CallbackState::Rejected);
        assert_eq!(outcome.rejection, Some(RejectionReason::ChecksumMismatch));
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(audit.with_message("Webhook verification")[0].context["verified"], false);
        assert_eq!(audit.with_message("Webhook processed")[0].context["state"], "REJECTED");
    }

    #[tokio::test]
    async fn missing_checksum_is_rejected() {
        let (ingester, seen, _) = setup();
        let outcome = ingester.ingest(&body("ord_2", "00"), None).await;
        assert_eq!(outcome.rejection, Some(RejectionReason::MissingChecksum));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn signed_garbage_is_rejected() {
        let (ingester, seen, _) = setup();
        for payload in [b"not json".to_vec(), br#"{"paymentOrderId":"  ","responseCode":"00"}"#.to_vec()] {
            let outcome = ingester.ingest(&payload, Some(&sign(&payload))).await;
            assert!(matches!(outcome.rejection, Some(RejectionReason::MalformedPayload(_))));
        }
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn every_branch_leaves_an_audit_trail() {
        let (ingester, _, audit) = setup();
        let payload = body("ord_3", "24");
        ingester.ingest(&payload, Some(&sign(&payload))).await;
        ingester.ingest(&payload, Some("deadbeef")).await;
        ingester.ingest(b"{}", Some(&sign(b"{}"))).await;
        for message in ["Webhook received", "Webhook verification", "Webhook processed"] {
            assert_eq!(audit.with_message(message).len(), 3, "{message}");
        }
    }

    #[test]
    fn accepts_order_id_alias() {
        let cb: ProviderCallback = serde_json::from_str(r#"{"orderId":"ord_7","responseCode":"01"}"#).unwrap();
        assert_eq!(cb.payment_order_id.as_str(), "ord_7");
        assert_eq!(cb.message, None);
    }
}
