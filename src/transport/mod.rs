//! Transport endpoints (C1): the streaming (WebSocket) listener and the
//! request/response listener, plus the session registry that backs
//! `push_to_user` and the connection registry's kick callback. Grounded on
//! `examples/original_source/common/network/websocket_server.hpp` (accept
//! loop owns sessions; closing goes through the owner, never a raw pointer)
//! and the teacher's axum `Router`/`AppState` wiring in `main.rs`.

pub mod http;
pub mod session;
pub mod ws;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::registry::SessionCloser;

pub use session::{BoundIdentity, Session};

/// Owns every live streaming session on this node. The connection registry
/// (C3) never holds a `Session` directly — only a `session_id` — and routes
/// closes back through here (spec.md §9 "manual shared ownership graphs"
/// redesign: one-way ownership, back-references become lookups).
#[derive(Default)]
pub struct Transport {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl Transport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, session: Arc<Session>) {
        self.sessions.write().await.insert(session.session_id.clone(), session);
    }

    pub async fn unregister(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.write().await.remove(session_id)
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// `push_to_user`'s local-delivery half (spec.md §4.2): enqueues onto a
    /// session already known to live on this node. Returns `false` (not an
    /// error) when the session is absent or its queue is saturated/closed —
    /// callers distinguish "not local" from "local but failed" by first
    /// consulting the registry.
    pub async fn send_to_session(&self, session_id: &str, bytes: Vec<u8>) -> bool {
        let Some(session) = self.get(session_id).await else {
            return false;
        };
        session.send(bytes).is_ok()
    }

    /// Closes and forgets every session (spec.md §4.7 `stop()`: "closes
    /// remaining sessions").
    pub async fn close_all(&self) {
        let mut sessions = self.sessions.write().await;
        for (session_id, session) in sessions.drain() {
            debug!(session_id, "closing session on shutdown");
            session.close();
        }
    }
}

#[async_trait]
impl SessionCloser for Transport {
    async fn close(&self, session_id: &str) {
        if let Some(session) = self.unregister(session_id).await {
            session.close();
        }
    }
}
