//! Test doubles for exercising the engine and mediator without a network.

use crate::error::{TransportError, TransportResult};
use crate::events::SyncEvent;
use crate::models::QueuedRequest;
use crate::transport::{Transport, TransportResponse};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::broadcast;

/// One scripted transport outcome.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    Status(u16),
    Error(String),
}

/// Transport that replays a script of outcomes and records every request
/// it sees. An exhausted script answers 200 with an empty body.
#[derive(Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<ScriptedOutcome>>,
    seen: Mutex<Vec<QueuedRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a status outcome to the script.
    pub fn push_status(&self, status: u16) {
        self.script
            .lock()
            .expect("lock poisoned")
            .push_back(ScriptedOutcome::Status(status));
    }

    /// Append a network-error outcome to the script.
    pub fn push_error(&self, message: &str) {
        self.script
            .lock()
            .expect("lock poisoned")
            .push_back(ScriptedOutcome::Error(message.to_string()));
    }

    /// Requests executed so far, in order.
    pub fn seen(&self) -> Vec<QueuedRequest> {
        self.seen.lock().expect("lock poisoned").clone()
    }

    /// Number of requests executed so far.
    pub fn request_count(&self) -> usize {
        self.seen.lock().expect("lock poisoned").len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(&self, request: &QueuedRequest) -> TransportResult<TransportResponse> {
        self.seen
            .lock()
            .expect("lock poisoned")
            .push(request.clone());

        let outcome = self.script.lock().expect("lock poisoned").pop_front();
        match outcome {
            Some(ScriptedOutcome::Status(status)) => Ok(TransportResponse {
                status,
                headers: HashMap::new(),
                body: Vec::new(),
            }),
            Some(ScriptedOutcome::Error(message)) => Err(TransportError::Failed(message)),
            None => Ok(TransportResponse {
                status: 200,
                headers: HashMap::new(),
                body: Vec::new(),
            }),
        }
    }
}

/// Drain all immediately available events from a receiver.
pub fn drain_events(rx: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    events
}
