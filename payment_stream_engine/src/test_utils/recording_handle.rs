use std::sync::{Arc, Mutex};

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::watch;

use crate::registry::{CloseReason, ConnectionId, OutputHandle, TransportWriteError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteBehaviour {
    Accept,
    /// Every write fails as if the client had vanished.
    Fail,
    /// Every write hangs forever.
    Stall,
}

/// An [`OutputHandle`] that records every frame written to it.
#[derive(Debug)]
pub struct RecordingHandle {
    id: ConnectionId,
    behaviour: Mutex<WriteBehaviour>,
    frames: Mutex<Vec<Bytes>>,
    state: watch::Sender<Option<CloseReason>>,
}

impl RecordingHandle {
    pub fn new() -> Arc<Self> {
        Self::with_behaviour(WriteBehaviour::Accept)
    }

    pub fn with_behaviour(behaviour: WriteBehaviour) -> Arc<Self> {
        let (state, _) = watch::channel(None);
        Arc::new(Self {
            id: ConnectionId::generate(),
            behaviour: Mutex::new(behaviour),
            frames: Mutex::new(Vec::new()),
            state,
        })
    }

    pub fn frames(&self) -> Vec<Bytes> {
        self.frames.lock().map(|f| f.clone()).unwrap_or_default()
    }

    /// Changes how later writes behave. Unlike [`RecordingHandle::disconnect`], this does not close the handle, much
    /// like a peer that vanished without the transport noticing.
    pub fn set_behaviour(&self, behaviour: WriteBehaviour) {
        if let Ok(mut b) = self.behaviour.lock() {
            *b = behaviour;
        }
    }

    /// The number of keep-alive comment frames written so far.
    pub fn keep_alive_count(&self) -> usize {
        self.frames().iter().filter(|f| f.starts_with(b":")).count()
    }

    /// The JSON payload of every frame. Comment frames are skipped.
    pub fn messages(&self) -> Vec<Value> {
        self.frames()
            .iter()
            .filter_map(|f| std::str::from_utf8(f).ok())
            .filter_map(|s| serde_json::from_str(s.trim_start_matches("data: ").trim_end()).ok())
            .collect()
    }

    /// The `message` field of every status frame.
    pub fn status_messages(&self) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter(|v| v["type"] == "status")
            .filter_map(|v| v["message"].as_str().map(String::from))
            .collect()
    }

    /// Simulates the client hanging up.
    pub fn disconnect(&self) {
        self.set_state(CloseReason::ClientDisconnect);
    }

    pub fn closed_by_server(&self) -> bool {
        matches!(*self.state.borrow(), Some(r) if r != CloseReason::ClientDisconnect)
    }

    fn set_state(&self, reason: CloseReason) {
        self.state.send_if_modified(|s| {
            if s.is_none() {
                *s = Some(reason);
                true
            } else {
                false
            }
        });
    }
}

impl OutputHandle for RecordingHandle {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn write(&self, frame: Bytes) -> Result<(), TransportWriteError> {
        let state = *self.state.borrow();
        match state {
            None => {},
            Some(CloseReason::ClientDisconnect) => return Err(TransportWriteError::Disconnected),
            Some(_) => return Err(TransportWriteError::Closed),
        }
        let behaviour = self.behaviour.lock().map(|b| *b).unwrap_or(WriteBehaviour::Accept);
        match behaviour {
            WriteBehaviour::Accept => {
                if let Ok(mut frames) = self.frames.lock() {
                    frames.push(frame);
                }
                Ok(())
            },
            WriteBehaviour::Fail => Err(TransportWriteError::Disconnected),
            WriteBehaviour::Stall => std::future::pending().await,
        }
    }

    fn close(&self, reason: CloseReason) {
        self.set_state(reason);
    }

    fn is_closed(&self) -> bool {
        self.state.borrow().is_some()
    }

    fn close_reason(&self) -> Option<CloseReason> {
        *self.state.borrow()
    }

    async fn closed(&self) {
        let mut state = self.state.subscribe();
        let _ = state.wait_for(|s| s.is_some()).await;
    }
}
