use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Registry-side half of a live connection: the producer end of its bounded
/// outbound buffer plus the online flag.
#[derive(Debug)]
pub struct SessionHandle {
    user_id: String,
    conn_id: Uuid,
    outbound: mpsc::Sender<String>,
    online: AtomicBool,
    closed: CancellationToken,
}

impl SessionHandle {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Fires once the session is unregistered or displaced. The outbound pump
    /// watches it to close its end of the buffer.
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Waiting hand-over into this session's own buffer. Only the session's
    /// connection task uses it, to drain backlog before going live.
    pub async fn send_waiting(&self, data: String) -> bool {
        if self.closed.is_cancelled() {
            return false;
        }
        self.outbound.send(data).await.is_ok()
    }

    fn try_send(&self, data: String) -> bool {
        if !self.is_online() {
            return false;
        }
        match self.outbound.try_send(data) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Outbound buffer full for {}", self.user_id);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    fn close(&self) {
        self.online.store(false, Ordering::Release);
        self.closed.cancel();
    }
}

/// In-memory map of online user id -> live session.
pub struct ClientRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    capacity: usize,
}

impl ClientRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Create a session and its outbound buffer without publishing it. The
    /// caller registers it once the durable backlog has been handed over.
    pub fn open_session(&self, user_id: &str) -> (Arc<SessionHandle>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let handle = Arc::new(SessionHandle {
            user_id: user_id.to_string(),
            conn_id: Uuid::new_v4(),
            outbound: tx,
            online: AtomicBool::new(true),
            closed: CancellationToken::new(),
        });
        (handle, rx)
    }

    /// Install `session` for its user id. A session already registered for
    /// the same id is closed and returned.
    pub async fn register(&self, session: Arc<SessionHandle>) -> Option<Arc<SessionHandle>> {
        let user_id = session.user_id.clone();
        let conn_id = session.conn_id;
        let displaced = self.sessions.write().await.insert(user_id.clone(), session);

        if let Some(old) = &displaced {
            old.close();
            info!(
                "Client {} reconnected ({} replaces {}), closing previous session",
                user_id, conn_id, old.conn_id
            );
        } else {
            info!("Client registered: {} ({})", user_id, conn_id);
        }
        displaced
    }

    /// Remove the session, but only if `conn_id` still owns the entry. A
    /// connection displaced by a newer one must not tear down its successor.
    pub async fn unregister(&self, user_id: &str, conn_id: Uuid) -> bool {
        let mut sessions = self.sessions.write().await;
        let owns = sessions.get(user_id).is_some_and(|s| s.conn_id == conn_id);
        if !owns {
            debug!("Stale unregister for {} ({}), newer session kept", user_id, conn_id);
            return false;
        }

        if let Some(session) = sessions.remove(user_id) {
            session.close();
        }
        info!("Client unregistered: {} ({})", user_id, conn_id);
        true
    }

    /// Non-blocking hand-over to a live session. False when the user is
    /// unknown, offline, or its buffer is full; the caller decides whether to
    /// persist.
    pub async fn send(&self, user_id: &str, data: String) -> bool {
        let sessions = self.sessions.read().await;
        match sessions.get(user_id) {
            Some(session) => session.try_send(data),
            None => false,
        }
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        self.sessions
            .read()
            .await
            .get(user_id)
            .is_some_and(|s| s.is_online())
    }

    pub async fn online_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
