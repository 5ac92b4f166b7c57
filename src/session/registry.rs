//! Owned, shared session set.
//!
//! Every mutation goes through [`SessionRegistry::update`], which validates the state
//! transition, commits the record, rewrites the snapshot and announces the change.
//! Background tasks hold a session id and re-fetch through the registry instead of
//! keeping their own copy of the record.

use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use super::model::{Session, SessionState};
use super::store::{SessionMap, SessionStore};

/// Emitted whenever a committed mutation changed a session's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub session_id: String,
    pub from: SessionState,
    pub to: SessionState,
}

#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Mutex<SessionMap>>,
    store: SessionStore,
    changes: broadcast::Sender<StateChange>,
}

impl SessionRegistry {
    pub fn new(store: SessionStore) -> Self {
        Self::with_sessions(store, SessionMap::new())
    }

    /// Build a registry from whatever the store currently holds.
    pub async fn load(store: SessionStore) -> Self {
        let sessions = store.load().await;
        Self::with_sessions(store, sessions)
    }

    fn with_sessions(store: SessionStore, sessions: SessionMap) -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Mutex::new(sessions)),
            store,
            changes,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    pub async fn get(&self, id: &str) -> Option<Session> {
        self.inner.lock().await.get(id).cloned()
    }

    /// All sessions ordered by scheduled start.
    pub async fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.inner.lock().await.values().cloned().collect();
        sessions.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.id.cmp(&b.id)));
        sessions
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    /// Insert `session` unless another session for the same meeting still owns it,
    /// as decided by `owns_meeting`.
    ///
    /// Returns the id of the session that owns the meeting and whether it was created now.
    pub async fn insert_unique<F>(&self, session: Session, owns_meeting: F) -> (String, bool)
    where
        F: Fn(&Session) -> bool,
    {
        let mut sessions = self.inner.lock().await;

        if let Some(existing) = sessions
            .values()
            .filter(|s| s.meeting_ref == session.meeting_ref && owns_meeting(*s))
            .min_by(|a, b| a.start_time.cmp(&b.start_time))
        {
            debug!(
                "Meeting {} already driven by session {}",
                session.meeting_ref, existing.id
            );
            return (existing.id.clone(), false);
        }

        let id = session.id.clone();
        sessions.insert(id.clone(), session);
        self.store.save(&sessions).await;
        (id, true)
    }

    /// Apply `mutate` to the session and commit it.
    ///
    /// Returns `None` when the session is gone or when the mutation would take an
    /// edge the state machine does not allow; in the latter case nothing is committed.
    pub async fn update<F, R>(&self, id: &str, mutate: F) -> Option<R>
    where
        F: FnOnce(&mut Session) -> R,
    {
        let mut sessions = self.inner.lock().await;
        let current = sessions.get(id)?;

        let mut next = current.clone();
        let result = mutate(&mut next);

        let from = current.state;
        let to = next.state;
        if from != to && !from.can_transition_to(to) {
            warn!(
                "Rejected transition {} -> {} for session {} ({})",
                from, to, id, next.meeting_ref
            );
            return None;
        }

        if &next == current {
            return Some(result);
        }

        sessions.insert(id.to_string(), next);
        self.store.save(&sessions).await;

        if from != to {
            debug!("Session {} moved {} -> {}", id, from, to);
            let _ = self.changes.send(StateChange {
                session_id: id.to_string(),
                from,
                to,
            });
        }

        Some(result)
    }

    /// Move the session to `to` if the edge is allowed. Returns whether it moved.
    pub async fn transition(&self, id: &str, to: SessionState) -> bool {
        self.update(id, |session| {
            session.state = to;
        })
        .await
        .is_some()
    }

    pub async fn remove(&self, id: &str) -> Option<Session> {
        let mut sessions = self.inner.lock().await;
        let removed = sessions.remove(id);
        if removed.is_some() {
            self.store.save(&sessions).await;
        }
        removed
    }
}
