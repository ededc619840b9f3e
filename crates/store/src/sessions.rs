//! In-memory session store
//!
//! Maps session ids to independently lockable sessions. The map lock is only
//! held to look a session up; all mutation happens under that session's own
//! mutex, so one slow pipeline never blocks other sessions.

use crate::{Result, StoreError};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rover_core::Session;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// Shared, lockable handle to one session
pub type SessionHandle = Arc<Mutex<Session>>;

struct Entry {
    session: SessionHandle,
    /// Unix milliseconds of the last lookup
    last_accessed: AtomicI64,
}

impl Entry {
    fn new(session: Session, now: DateTime<Utc>) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            last_accessed: AtomicI64::new(now.timestamp_millis()),
        }
    }

    fn touch(&self, now: DateTime<Utc>) {
        self.last_accessed
            .store(now.timestamp_millis(), Ordering::Relaxed);
    }

    fn is_expired(&self, now: DateTime<Utc>, ttl: ChronoDuration) -> bool {
        let idle = now.timestamp_millis() - self.last_accessed.load(Ordering::Relaxed);
        idle > ttl.num_milliseconds()
    }
}

#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, Entry>>>,
    ttl: ChronoDuration,
}

impl SessionStore {
    /// Sessions idle for longer than `ttl` are dropped.
    pub fn new(ttl: Duration) -> Self {
        let ttl = ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::days(36_500));
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Create a fresh session and return its id and handle.
    pub async fn create(&self) -> (String, SessionHandle) {
        self.insert(Session::new()).await
    }

    /// Register an existing session, replacing any with the same id.
    pub async fn insert(&self, session: Session) -> (String, SessionHandle) {
        let id = session.id.clone();
        let entry = Entry::new(session, Utc::now());
        let handle = entry.session.clone();
        self.sessions.write().await.insert(id.clone(), entry);
        info!("Created session {}", id);
        (id, handle)
    }

    /// Look up a live session, refreshing its idle timer.
    pub async fn get(&self, id: &str) -> Result<SessionHandle> {
        let now = Utc::now();
        {
            let sessions = self.sessions.read().await;
            match sessions.get(id) {
                Some(entry) if !entry.is_expired(now, self.ttl) => {
                    entry.touch(now);
                    return Ok(entry.session.clone());
                }
                Some(_) => {}
                None => return Err(StoreError::SessionNotFound(id.to_string())),
            }
        }

        debug!("Session {} expired", id);
        self.sessions.write().await.remove(id);
        Err(StoreError::SessionNotFound(id.to_string()))
    }

    /// Return a session to its initial state, keeping its id.
    pub async fn reset(&self, id: &str) -> Result<()> {
        let handle = self.get(id).await?;
        handle.lock().await.reset();
        info!("Reset session {}", id);
        Ok(())
    }

    pub async fn remove(&self, id: &str) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drop every session idle past the TTL; returns how many were dropped.
    pub async fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Utc::now()).await
    }

    pub async fn cleanup_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| !entry.is_expired(now, self.ttl));
        let removed = before - sessions.len();
        if removed > 0 {
            info!("Cleaned up {} expired sessions", removed);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rover_core::SessionState;

    fn store() -> SessionStore {
        SessionStore::new(Duration::from_secs(2 * 60 * 60))
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = store();
        let (id, _) = store.create().await;

        let handle = store.get(&id).await.unwrap();
        assert_eq!(handle.lock().await.id, id);
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let err = store().get("missing").await.unwrap_err();
        assert!(matches!(err, StoreError::SessionNotFound(id) if id == "missing"));
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let store = store();
        let (a, _) = store.create().await;
        let (b, _) = store.create().await;

        store.get(&a).await.unwrap().lock().await.begin_search("1706.03762").unwrap();

        let b_state = store.get(&b).await.unwrap().lock().await.state;
        assert_eq!(b_state, SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn test_reset_keeps_id() {
        let store = store();
        let (id, handle) = store.create().await;
        handle.lock().await.fail("boom");

        store.reset(&id).await.unwrap();
        let session = store.get(&id).await.unwrap();
        let session = session.lock().await;
        assert_eq!(session.id, id);
        assert_eq!(session.state, SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let store = SessionStore::new(Duration::from_secs(60));
        store.create().await;
        store.create().await;

        assert_eq!(store.cleanup_expired().await, 0);
        let later = Utc::now() + ChronoDuration::minutes(5);
        assert_eq!(store.cleanup_expired_at(later).await, 2);
        assert_eq!(store.count().await, 0);
    }

    #[tokio::test]
    async fn test_expired_session_is_dropped_on_get() {
        let store = SessionStore::new(Duration::ZERO);
        let (id, _) = store.create().await;
        {
            let sessions = store.sessions.read().await;
            let entry = sessions.get(&id).unwrap();
            entry.last_accessed.store(0, Ordering::Relaxed);
        }

        assert!(store.get(&id).await.is_err());
        assert_eq!(store.count().await, 0);
    }
}
