use std::{fmt::Display, str::FromStr};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::error;
use serde::{Deserialize, Serialize};
use thiserror::Error;

//--------------------------------------   PaymentOrderId     ---------------------------------------------------------
/// Identifies a single payment attempt. This is the fan-out key for the connection registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentOrderId(pub String);

impl FromStr for PaymentOrderId {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<String> for PaymentOrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PaymentOrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Display for PaymentOrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl PaymentOrderId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

//--------------------------------------   PaymentStatus     ----------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// The provider has accepted the payment request but has not settled it yet.
    Pending,
    /// The payment completed.
    Success,
    /// The payment was declined, errored, or came back with a code we don't recognise.
    Failed,
    /// The customer or the provider cancelled the payment.
    Cancelled,
}

impl PaymentStatus {
    /// Terminal statuses end every stream watching the order.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "PENDING"),
            PaymentStatus::Success => write!(f, "SUCCESS"),
            PaymentStatus::Failed => write!(f, "FAILED"),
            PaymentStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("Invalid payment status: {0}")]
pub struct ConversionError(String);

impl FromStr for PaymentStatus {
    type Err = ConversionError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            _ => Err(ConversionError(s.to_string())),
        }
    }
}

//--------------------------------------    StatusEvent      ----------------------------------------------------------
/// A canonical status update for one payment order. Events are immutable once built; use [`StatusEvent::new`] or
/// [`StatusEvent::with_message`] to create them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    payment_order_id: PaymentOrderId,
    status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    timestamp: DateTime<Utc>,
}

impl StatusEvent {
    pub fn new(payment_order_id: PaymentOrderId, status: PaymentStatus) -> Self {
        Self { payment_order_id, status, message: None, timestamp: Utc::now() }
    }

    pub fn with_message<S: Into<String>>(payment_order_id: PaymentOrderId, status: PaymentStatus, message: S) -> Self {
        Self { payment_order_id, status, message: Some(message.into()), timestamp: Utc::now() }
    }

    pub fn payment_order_id(&self) -> &PaymentOrderId {
        &self.payment_order_id
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl Display for StatusEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.payment_order_id, self.status)?;
        if let Some(m) = &self.message {
            write!(f, " ({m})")?;
        }
        Ok(())
    }
}

//--------------------------------------   StreamMessage     ----------------------------------------------------------
/// Everything that can be written to a client stream. Serialized with a `type` discriminant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    #[serde(rename_all = "camelCase")]
    Connected { payment_order_id: PaymentOrderId },
    Status(StatusEvent),
    #[serde(rename_all = "camelCase")]
    Timeout { payment_order_id: PaymentOrderId, message: String },
}

impl StreamMessage {
    pub fn connected(payment_order_id: &PaymentOrderId) -> Self {
        Self::Connected { payment_order_id: payment_order_id.clone() }
    }

    pub fn timeout(payment_order_id: &PaymentOrderId) -> Self {
        Self::Timeout {
            payment_order_id: payment_order_id.clone(),
            message: "Stream lifetime exceeded. Reconnect to keep watching this payment.".into(),
        }
    }

    /// Formats the message as a single server-sent-events frame: `data: <json>\n\n`.
    pub fn to_sse_frame(&self) -> Bytes {
        // Serializing these types cannot fail: every field is a string, an enum or a timestamp.
        let json = serde_json::to_string(self).unwrap_or_else(|e| {
            error!("📡️ Could not serialize stream message. {e}");
            String::from("{}")
        });
        Bytes::from(format!("data: {json}\n\n"))
    }
}

/// An SSE comment frame. Clients ignore it, but writing it makes the transport notice a peer that has gone away.
pub fn keep_alive_frame() -> Bytes {
    Bytes::from_static(b": keep-alive\n\n")
}

impl From<StatusEvent> for StreamMessage {
    fn from(event: StatusEvent) -> Self {
        Self::Status(event)
    }
}
