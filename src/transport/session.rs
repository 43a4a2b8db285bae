//! Session object (C2): per-connection state on the streaming transport —
//! id, remote address, extracted bearer credential, bounded send queue.
//! Grounded on `examples/original_source/common/network/websocket_session.hpp`
//! (one send queue per connection, a single writer draining it) and the
//! teacher's `AppState`-style "plain value, `Arc`-backed, threaded through"
//! construction.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::Message as WsMessage;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

/// Frames queued beyond this many are backpressure: the session is closed
/// with a transport-overload error (spec.md §4.1 / §5).
pub const MAX_SEND_QUEUE: usize = 1024;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Generates the monotonic, process-wide unique `"session_{N}"` id
/// (spec.md §4.1). Cross-node uniqueness is not guaranteed, per spec.md §9.
pub fn next_session_id() -> String {
    format!("session_{}", NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    QueueFull,
    Closed,
}

/// One live client connection on the framed transport. Owned by
/// [`super::Transport`]; the registry (C3) holds only the `session_id` and
/// looks sessions up through the transport (spec.md §9 one-way ownership
/// redesign).
pub struct Session {
    pub session_id: String,
    pub remote_addr: String,
    pub bound_identity: RwLock<Option<BoundIdentity>>,
    tx: mpsc::Sender<WsMessage>,
    closed: AtomicBool,
}

#[derive(Debug, Clone)]
pub struct BoundIdentity {
    pub user_id: String,
    pub device_id: String,
    pub platform: crate::config::Platform,
}

impl Session {
    /// Creates a session and its bounded send queue, returning the queue's
    /// receiving half for the write-loop task to drain (spec.md §4.1:
    /// "a single writer task per session drains the queue in FIFO order").
    pub fn new(session_id: String, remote_addr: String) -> (Arc<Self>, mpsc::Receiver<WsMessage>) {
        let (tx, rx) = mpsc::channel(MAX_SEND_QUEUE);
        let session = Arc::new(Self {
            session_id,
            remote_addr,
            bound_identity: RwLock::new(None),
            tx,
            closed: AtomicBool::new(false),
        });
        (session, rx)
    }

    /// Enqueues `bytes` for delivery. Non-blocking: a full queue is
    /// reported to the caller rather than applying backpressure upstream,
    /// so the caller can close the session per spec.md §5.
    pub fn send(&self, bytes: Vec<u8>) -> Result<(), SendError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SendError::Closed);
        }
        self.tx
            .try_send(WsMessage::Binary(bytes.into()))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SendError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => SendError::Closed,
            })
    }

    /// Idempotent; callable from any task (spec.md §4.1).
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(session_id = %self.session_id, "session closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Drains `rx` in FIFO order onto `socket`, the write half of the
/// streaming connection. Concurrent `Session::send` callers are therefore
/// always serialized into one ordered byte stream (spec.md §5: "per-session
/// writes: strictly FIFO").
pub async fn run_write_loop(
    session: Arc<Session>,
    mut rx: mpsc::Receiver<WsMessage>,
    mut sink: futures_util::stream::SplitSink<axum::extract::ws::WebSocket, WsMessage>,
) {
    use futures_util::SinkExt;

    while let Some(msg) = rx.recv().await {
        if session.is_closed() {
            break;
        }
        if let Err(e) = sink.send(msg).await {
            warn!(session_id = %session.session_id, error = %e, "write failed, closing session");
            session.close();
            break;
        }
    }
    let _ = sink.close().await;
}
