//! Session lookup with idle-TTL cleanup and capacity eviction.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use parlance_domain::config::SessionsConfig;

use crate::session::Session;

/// Owns every live session. Finished sessions linger for their idle TTL
/// so late retrievals and replays still find the log; capacity overruns
/// evict the least recently active session first.
pub struct SessionRegistry {
    inner: Mutex<HashMap<String, Arc<Session>>>,
    ttl: Option<Duration>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(cfg: &SessionsConfig) -> Self {
        SessionRegistry {
            inner: Mutex::new(HashMap::new()),
            ttl: cfg.ttl(),
            max_sessions: cfg.max_active_sessions.max(1),
        }
    }

    pub fn add(&self, session: Arc<Session>) {
        let mut sessions = self.inner.lock();
        Self::cleanup_locked(&mut sessions, self.ttl);
        sessions.insert(session.id().to_string(), session);
        self.evict_excess_locked(&mut sessions);
    }

    /// Look up a session and refresh its activity clock.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        let mut sessions = self.inner.lock();
        Self::cleanup_locked(&mut sessions, self.ttl);
        let session = sessions.get(id).cloned();
        if let Some(session) = &session {
            session.touch();
        }
        session
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.inner.lock().remove(id)
    }

    /// Drop finished sessions that have been idle past the TTL.
    pub fn cleanup_expired(&self) {
        let mut sessions = self.inner.lock();
        Self::cleanup_locked(&mut sessions, self.ttl);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    fn cleanup_locked(sessions: &mut HashMap<String, Arc<Session>>, ttl: Option<Duration>) {
        let Some(ttl) = ttl else { return };
        sessions.retain(|_, session| {
            !(session.is_completed() && session.last_activity_at().elapsed() >= ttl)
        });
    }

    fn evict_excess_locked(&self, sessions: &mut HashMap<String, Arc<Session>>) {
        while sessions.len() > self.max_sessions {
            let victim = sessions
                .values()
                .min_by_key(|session| session.last_activity_at())
                .map(|session| session.id().to_string());
            let Some(id) = victim else { break };
            if let Some(session) = sessions.remove(&id) {
                tracing::warn!(session_id = %id, "session capacity reached, evicting least recently active");
                session.cancel();
            }
        }
    }
}
