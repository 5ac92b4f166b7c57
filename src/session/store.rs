//! Snapshot persistence for the session set.
//!
//! The whole map is rewritten on every save. Failures are logged and swallowed so
//! an unavailable disk never interrupts a join in progress.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, info, warn};

use super::model::Session;

pub type SessionMap = HashMap<String, Session>;

#[derive(Debug, Clone)]
pub struct SessionStore {
    path: Option<PathBuf>,
}

impl SessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    /// A store that keeps nothing; used by one-shot commands and tests.
    pub fn in_memory() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn load(&self) -> SessionMap {
        let Some(path) = &self.path else {
            return SessionMap::new();
        };

        if !path.exists() {
            debug!("No session snapshot at {:?}", path);
            return SessionMap::new();
        }

        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) => {
                error!("Failed to read session snapshot {:?}: {}", path, e);
                return SessionMap::new();
            }
        };

        match serde_json::from_str::<SessionMap>(&content) {
            Ok(sessions) => {
                info!("Loaded {} sessions from {:?}", sessions.len(), path);
                sessions
            }
            Err(e) => {
                error!("Failed to parse session snapshot {:?}: {}", path, e);
                SessionMap::new()
            }
        }
    }

    pub async fn save(&self, sessions: &SessionMap) {
        let Some(path) = &self.path else {
            return;
        };

        if let Err(e) = Self::write_snapshot(path, sessions).await {
            warn!("Failed to persist {} sessions to {:?}: {}", sessions.len(), path, e);
        }
    }

    async fn write_snapshot(path: &Path, sessions: &SessionMap) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(sessions)?;

        // Write beside the target then rename so a crash never leaves half a snapshot.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }
}
