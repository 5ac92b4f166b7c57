//! Background tasks tracked per session.
//!
//! Each session has at most one task per [`TaskKind`]. Spawning into an occupied
//! slot aborts the previous occupant first, unless the previous occupant is the
//! task doing the spawning (a monitor handing off to its successor simply returns).

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Join-with-retry driven by the sweep or an explicit request.
    Join,
    /// Admission monitor, later replaced by the transcript monitor.
    Monitor,
    /// Stale-session teardown.
    Retire,
}

type Key = (String, TaskKind);

#[derive(Default)]
pub struct TaskSet {
    handles: Mutex<HashMap<Key, JoinHandle<()>>>,
}

fn is_current(handle: &JoinHandle<()>) -> bool {
    tokio::task::try_id() == Some(handle.id())
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&self, session_id: &str, kind: TaskKind, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let key = (session_id.to_string(), kind);
        let mut handles = self.lock();

        if let Some(previous) = handles.remove(&key) {
            if !previous.is_finished() && !is_current(&previous) {
                debug!("Replacing {:?} task for session {}", kind, session_id);
                previous.abort();
            }
        }

        handles.insert(key, tokio::spawn(task));
    }

    pub fn is_running(&self, session_id: &str, kind: TaskKind) -> bool {
        self.lock()
            .get(&(session_id.to_string(), kind))
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn has_any(&self, session_id: &str) -> bool {
        self.lock()
            .iter()
            .any(|((id, _), handle)| id == session_id && !handle.is_finished())
    }

    /// Detach the task from the set so the caller can abort or await it.
    pub fn take(&self, session_id: &str, kind: TaskKind) -> Option<JoinHandle<()>> {
        self.lock().remove(&(session_id.to_string(), kind))
    }

    pub fn cancel(&self, session_id: &str, kind: TaskKind) {
        if let Some(handle) = self.take(session_id, kind) {
            if !is_current(&handle) {
                handle.abort();
            }
        }
    }

    /// Drop handles of tasks that already finished.
    pub fn prune(&self) {
        self.lock().retain(|_, handle| !handle.is_finished());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Key, JoinHandle<()>>> {
        // A panic while holding this lock can't leave the map inconsistent.
        self.handles.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
