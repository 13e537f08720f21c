use std::{
    fmt::Display,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
        Mutex,
        PoisonError,
    },
    time::Duration,
};

use bytes::Bytes;
use log::*;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

/// Process-unique connection identifier. Used to pick a connection out of its bucket on deregistration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn generate() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Error)]
pub enum TransportWriteError {
    #[error("The output stream has already been closed.")]
    Closed,
    #[error("The client has disconnected.")]
    Disconnected,
    #[error("The write did not complete within {0:?}.")]
    TimedOut(Duration),
}

/// Why an output stream was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// A terminal payment status was delivered.
    TerminalStatus,
    /// A write failed or timed out.
    WriteFailure,
    /// The stream outlived its maximum lifetime.
    Timeout,
    /// The client went away.
    ClientDisconnect,
}

impl Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::TerminalStatus => write!(f, "terminal status"),
            CloseReason::WriteFailure => write!(f, "write failure"),
            CloseReason::Timeout => write!(f, "timeout"),
            CloseReason::ClientDisconnect => write!(f, "client disconnect"),
        }
    }
}

/// A write-capable, closable transport owned by exactly one connection.
///
/// The handle does not own the network socket. Closing it only signals the transport that no more frames will follow.
pub trait OutputHandle: Send + Sync + 'static {
    fn id(&self) -> ConnectionId;

    fn write(&self, frame: Bytes) -> impl Future<Output = Result<(), TransportWriteError>> + Send;

    /// Idempotent. Only the first close records its reason.
    fn close(&self, reason: CloseReason);

    fn is_closed(&self) -> bool;

    /// `None` while the handle is open.
    fn close_reason(&self) -> Option<CloseReason>;

    /// Resolves once the handle is closed, from either end. Resolves immediately if it already is.
    fn closed(&self) -> impl Future<Output = ()> + Send;
}

//--------------------------------------       SseSink       ---------------------------------------------------------
/// An [`OutputHandle`] backed by a bounded channel. The receiving half ([`SseReceiver`]) becomes the body of the
/// HTTP response; the web framework drops it when the client goes away.
///
/// The sink holds the only long-lived sender. Closing the sink drops it, so the receiver yields whatever frames are
/// still buffered and then ends, which ends the response body.
#[derive(Debug)]
pub struct SseSink {
    id: ConnectionId,
    sender: Mutex<Option<mpsc::Sender<Bytes>>>,
    shutdown: watch::Sender<Option<CloseReason>>,
}

#[derive(Debug)]
pub struct SseReceiver {
    receiver: mpsc::Receiver<Bytes>,
}

impl SseReceiver {
    pub async fn next_frame(&mut self) -> Option<Bytes> {
        self.receiver.recv().await
    }

    pub fn into_inner(self) -> mpsc::Receiver<Bytes> {
        self.receiver
    }
}

impl SseSink {
    pub fn new(buffer_size: usize) -> (Arc<Self>, SseReceiver) {
        let (sender, receiver) = mpsc::channel(buffer_size.max(1));
        let (shutdown, _) = watch::channel(None);
        let sink = Self { id: ConnectionId::generate(), sender: Mutex::new(Some(sender)), shutdown };
        (Arc::new(sink), SseReceiver { receiver })
    }

    /// True if the server side closed this sink (terminal status, timeout, write failure), as opposed to the client
    /// hanging up.
    pub fn closed_by_server(&self) -> bool {
        matches!(*self.shutdown.borrow(), Some(r) if r != CloseReason::ClientDisconnect)
    }

    fn record_reason(&self, reason: CloseReason) {
        self.shutdown.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }

    fn sender(&self) -> Option<mpsc::Sender<Bytes>> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl OutputHandle for SseSink {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn write(&self, frame: Bytes) -> Result<(), TransportWriteError> {
        let sender = self.sender().ok_or(TransportWriteError::Closed)?;
        sender.send(frame).await.map_err(|_| TransportWriteError::Disconnected)
    }

    fn close(&self, reason: CloseReason) {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner).take();
        if sender.is_some() {
            trace!("📡️ Closing output stream {} ({reason})", self.id);
            self.record_reason(reason);
        }
    }

    fn is_closed(&self) -> bool {
        match self.sender() {
            Some(s) => s.is_closed(),
            None => true,
        }
    }

    fn close_reason(&self) -> Option<CloseReason> {
        *self.shutdown.borrow()
    }

    async fn closed(&self) {
        let mut shutdown = self.shutdown.subscribe();
        let Some(sender) = self.sender() else {
            return;
        };
        // `sender` is a temporary clone; it is released as soon as either branch completes
        tokio::select! {
            _ = sender.closed() => self.record_reason(CloseReason::ClientDisconnect),
            _ = shutdown.wait_for(|reason| reason.is_some()) => {},
        }
    }
}
