//! Fan-out of events to connected websocket sessions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, error};
use uuid::Uuid;

use crate::events::{Event, EventMessage};

pub type SessionId = Uuid;

/// Frames a slow session may fall behind before it is dropped.
pub const DEFAULT_SESSION_QUEUE: usize = 256;

/// Receiving end of one session.
pub struct Subscription {
    pub id: SessionId,
    pub frames: mpsc::Receiver<Arc<str>>,
}

/// Process-wide registry of websocket sessions.
///
/// Each session owns a bounded queue drained by its socket task. A session
/// whose queue is closed or full is removed on the next broadcast.
pub struct EventBus {
    sessions: Mutex<HashMap<SessionId, mpsc::Sender<Arc<str>>>>,
    queue: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_QUEUE)
    }
}

impl EventBus {
    pub fn new(queue: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            queue: queue.max(1),
        }
    }

    fn encode(event: Event) -> Option<Arc<str>> {
        let kind = event.kind();
        match serde_json::to_string(&EventMessage::now(event)) {
            Ok(text) => Some(Arc::from(text)),
            Err(e) => {
                error!(kind, error = %e, "Failed to serialize event");
                None
            }
        }
    }

    /// Register a session. `greeting` is queued to it before any broadcast.
    pub fn subscribe(&self, greeting: Option<Event>) -> Subscription {
        let (tx, rx) = mpsc::channel(self.queue);
        if let Some(frame) = greeting.and_then(Self::encode) {
            let _ = tx.try_send(frame);
        }

        let id = Uuid::new_v4();
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.insert(id, tx);
        debug!(session = %id, sessions = sessions.len(), "Session opened");
        Subscription { id, frames: rx }
    }

    pub fn unsubscribe(&self, id: SessionId) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if sessions.remove(&id).is_some() {
            debug!(session = %id, sessions = sessions.len(), "Session closed");
        }
    }

    /// Queue `event` to every live session. Returns the number reached.
    pub fn broadcast(&self, event: Event) -> usize {
        let kind = event.kind();
        let Some(frame) = Self::encode(event) else {
            return 0;
        };

        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let mut dead = Vec::new();
        for (id, tx) in sessions.iter() {
            if tx.try_send(frame.clone()).is_err() {
                dead.push(*id);
            }
        }
        for id in &dead {
            sessions.remove(id);
        }
        if !dead.is_empty() {
            debug!(kind, pruned = dead.len(), "Pruned dead sessions");
        }
        sessions.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }
}
