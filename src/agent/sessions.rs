use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::agent::state::RequestState;
use crate::config::VerificationConfig;

struct PendingSession {
    state: RequestState,
    created_at: Instant,
}

/// Paused write actions keyed by session id, held in process memory only.
///
/// Each entry can be taken exactly once. Entries older than the TTL are treated as
/// absent, and the oldest entry is evicted when the store is full.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, PendingSession>>,
    ttl: Option<Duration>,
    max_sessions: usize,
}

impl SessionStore {
    pub fn new(ttl: Option<Duration>, max_sessions: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
            max_sessions: max_sessions.max(1),
        }
    }

    pub fn from_config(config: &VerificationConfig) -> Self {
        let ttl = (config.session_ttl_secs > 0).then(|| Duration::from_secs(config.session_ttl_secs));
        Self::new(ttl, config.max_pending_sessions)
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    fn is_expired(&self, session: &PendingSession, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.duration_since(session.created_at) >= ttl)
    }

    pub async fn insert(&self, session_id: String, state: RequestState) {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;

        sessions.retain(|_, session| !self.is_expired(session, now));

        if sessions.len() >= self.max_sessions {
            let oldest = sessions
                .iter()
                .min_by_key(|(_, session)| session.created_at)
                .map(|(id, _)| id.clone());
            if let Some(oldest) = oldest {
                warn!("Pending session limit reached, evicting session {}", oldest);
                sessions.remove(&oldest);
            }
        }

        debug!("Storing pending session {}", session_id);
        sessions.insert(session_id, PendingSession { state, created_at: now });
    }

    /// Removes and returns a session. A second call with the same id returns `None`.
    pub async fn take(&self, session_id: &str) -> Option<RequestState> {
        let session = self.sessions.lock().await.remove(session_id)?;

        if self.is_expired(&session, Instant::now()) {
            debug!("Session {} expired before it was confirmed", session_id);
            return None;
        }
        Some(session.state)
    }

    /// Drops expired sessions, returning how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, session| !self.is_expired(session, now));
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}
