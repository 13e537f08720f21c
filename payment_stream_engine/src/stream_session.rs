//! The lifecycle of a single client stream.
//!
//! A session is opened by writing the `connected` handshake and registering the output handle with the
//! [`ConnectionRegistry`]. From then on one of four things ends it:
//!
//! * a terminal status is broadcast to the order (`CLOSED_TERMINAL_STATUS`),
//! * the stream lives longer than its lifetime, in which case a `timeout` message is written first (`CLOSED_TIMEOUT`),
//! * the client goes away (`CLOSED_CLIENT_DISCONNECT`),
//! * the server drops it for any other reason, such as a failed write (`CLOSED_NORMAL`).
//!
//! Whichever happens first wins. The lifetime timer is cancelled on every other path, and the connection is always
//! deregistered before the session reports how it closed.
//!
//! A client that hangs up on an idle stream is invisible until something is written to it, so the session writes an
//! SSE comment frame every heartbeat interval. A failed heartbeat closes the handle as a client disconnect; a stalled
//! one counts as a write failure.
use std::{fmt::Display, sync::Arc, time::Duration};

use log::*;
use tokio::{task::JoinHandle, time::MissedTickBehavior};

use crate::{
    activity::ActivityLogger,
    registry::{CloseReason, ConnectionId, ConnectionRegistry, OutputHandle},
    status_types::{keep_alive_frame, PaymentOrderId, StreamMessage},
};

pub const DEFAULT_STREAM_LIFETIME: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamClosure {
    Normal,
    Timeout,
    TerminalStatus,
    ClientDisconnect,
}

impl Display for StreamClosure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamClosure::Normal => write!(f, "CLOSED_NORMAL"),
            StreamClosure::Timeout => write!(f, "CLOSED_TIMEOUT"),
            StreamClosure::TerminalStatus => write!(f, "CLOSED_TERMINAL_STATUS"),
            StreamClosure::ClientDisconnect => write!(f, "CLOSED_CLIENT_DISCONNECT"),
        }
    }
}

impl From<CloseReason> for StreamClosure {
    fn from(reason: CloseReason) -> Self {
        match reason {
            CloseReason::TerminalStatus => StreamClosure::TerminalStatus,
            CloseReason::Timeout => StreamClosure::Timeout,
            CloseReason::ClientDisconnect => StreamClosure::ClientDisconnect,
            CloseReason::WriteFailure => StreamClosure::Normal,
        }
    }
}

pub struct StreamSession<H: OutputHandle> {
    registry: ConnectionRegistry<H>,
    lifetime: Duration,
    heartbeat: Duration,
}

impl<H: OutputHandle> Clone for StreamSession<H> {
    fn clone(&self) -> Self {
        Self { registry: self.registry.clone(), lifetime: self.lifetime, heartbeat: self.heartbeat }
    }
}

impl<H: OutputHandle> StreamSession<H> {
    pub fn new(registry: ConnectionRegistry<H>, lifetime: Duration) -> Self {
        Self { registry, lifetime, heartbeat: DEFAULT_HEARTBEAT_INTERVAL }
    }

    /// Sets how often idle streams are probed with a keep-alive frame. Intervals under a second are raised to one
    /// second.
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = interval.max(MIN_HEARTBEAT_INTERVAL);
        self
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    pub fn heartbeat(&self) -> Duration {
        self.heartbeat
    }

    pub fn registry(&self) -> &ConnectionRegistry<H> {
        &self.registry
    }

    /// Starts streaming updates for `order_id` to `handle`.
    ///
    /// The handshake is written before the handle is registered, so it is always the first frame the client sees.
    /// The returned task resolves to the way the stream eventually closed.
    pub async fn open(&self, order_id: PaymentOrderId, handle: Arc<H>) -> JoinHandle<StreamClosure> {
        let id = handle.id();
        let logger = self.registry.logger().clone();
        let handshake = StreamMessage::connected(&order_id).to_sse_frame();
        let write_timeout = self.registry.write_timeout();
        let greeted = matches!(tokio::time::timeout(write_timeout, handle.write(handshake)).await, Ok(Ok(())));
        if !greeted {
            warn!("🔌️ Could not send the handshake to {id} for {order_id}. Giving up on the stream.");
            handle.close(CloseReason::ClientDisconnect);
            logger.stream_closed(&order_id, id, StreamClosure::ClientDisconnect);
            return tokio::spawn(async { StreamClosure::ClientDisconnect });
        }
        self.registry.register(order_id.clone(), Arc::clone(&handle)).await;
        info!("🔌️ Stream {id} opened for {order_id}");
        logger.stream_opened(&order_id, id);

        let registry = self.registry.clone();
        let timers = Timers { lifetime: self.lifetime, heartbeat: self.heartbeat };
        tokio::spawn(async move { run_lifecycle(registry, logger, order_id, id, handle, timers).await })
    }
}

#[derive(Clone, Copy)]
struct Timers {
    lifetime: Duration,
    heartbeat: Duration,
}

async fn run_lifecycle<H: OutputHandle>(
    registry: ConnectionRegistry<H>,
    logger: ActivityLogger,
    order_id: PaymentOrderId,
    id: ConnectionId,
    handle: Arc<H>,
    timers: Timers,
) -> StreamClosure {
    let Timers { lifetime, heartbeat } = timers;
    let expiry = tokio::time::sleep(lifetime);
    tokio::pin!(expiry);
    let mut heartbeats = tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);
    heartbeats.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let write_timeout = registry.write_timeout();
    let closure = loop {
        tokio::select! {
            _ = handle.closed() => {
                registry.deregister(&order_id, id).await;
                break handle.close_reason().map(StreamClosure::from).unwrap_or(StreamClosure::ClientDisconnect);
            },
            _ = &mut expiry => {
                debug!("🔌️ Stream {id} for {order_id} reached its lifetime of {lifetime:?}");
                // Deregister first so that no broadcast can follow the timeout message
                registry.deregister(&order_id, id).await;
                let frame = StreamMessage::timeout(&order_id).to_sse_frame();
                match tokio::time::timeout(write_timeout, handle.write(frame)).await {
                    Ok(Ok(())) => {},
                    Ok(Err(e)) => debug!("🔌️ Could not send the timeout message to {id}. {e}"),
                    Err(_) => debug!("🔌️ Timed out sending the timeout message to {id}"),
                }
                handle.close(CloseReason::Timeout);
                break handle.close_reason().map(StreamClosure::from).unwrap_or(StreamClosure::Timeout);
            },
            _ = heartbeats.tick() => {
                // The next pass through the loop picks up the closed handle
                match tokio::time::timeout(write_timeout, handle.write(keep_alive_frame())).await {
                    Ok(Ok(())) => trace!("🔌️ Heartbeat sent to {id}"),
                    Ok(Err(e)) => {
                        debug!("🔌️ Heartbeat to {id} for {order_id} failed. {e}");
                        handle.close(CloseReason::ClientDisconnect);
                    },
                    Err(_) => {
                        debug!("🔌️ Heartbeat to {id} for {order_id} did not complete within {write_timeout:?}");
                        handle.close(CloseReason::WriteFailure);
                    },
                }
            },
        }
    };
    info!("🔌️ Stream {id} for {order_id} closed: {closure}");
    logger.stream_closed(&order_id, id, closure);
    closure
}
