//! Durable session records for resuming interrupted runs.

use crate::core::OrchestratorSession;
use crate::errors::{SessionError, StoreError};
use crate::store::atomic::AtomicStore;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};

/// Directory under the store root holding session records.
pub const SESSIONS_DIR: &str = "sessions";

const SESSION_EXTENSION: &str = "yaml";

#[derive(Serialize)]
struct SessionRecord<'a> {
    #[serde(flatten)]
    session: &'a OrchestratorSession,
    artifacts: Vec<String>,
}

/// Saves and reloads [`OrchestratorSession`]s as YAML records.
#[derive(Debug, Clone)]
pub struct SessionStore {
    store: AtomicStore,
}

impl SessionStore {
    /// Creates a session store on top of an atomic store.
    #[must_use]
    pub fn new(store: AtomicStore) -> Self {
        Self { store }
    }

    /// Returns the path of a session's record, relative to the store root.
    #[must_use]
    pub fn record_path(session_id: &str) -> PathBuf {
        Path::new(SESSIONS_DIR).join(format!("{session_id}.{SESSION_EXTENSION}"))
    }

    /// Atomically writes the session record.
    pub fn save(&self, session: &OrchestratorSession) -> Result<PathBuf, SessionError> {
        let path = Self::record_path(&session.session_id);
        let record = SessionRecord {
            session,
            artifacts: session.artifacts(),
        };
        let written = self.store.write_record(&path, &record)?;
        debug!(
            session_id = %session.session_id,
            status = %session.status,
            stages = session.results().len(),
            "Session saved"
        );
        Ok(written)
    }

    /// Loads a session record.
    ///
    /// Fails with [`SessionError::NotFound`] when no record exists and with
    /// [`SessionError::Corrupted`] when the record lacks a `mode` string or a
    /// `stages` list, or otherwise cannot be decoded.
    pub fn load(&self, session_id: &str) -> Result<OrchestratorSession, SessionError> {
        let path = Self::record_path(session_id);
        let Some(content) = self.store.read(&path)? else {
            return Err(SessionError::NotFound(session_id.to_string()));
        };

        let corrupted = |reason: String| SessionError::Corrupted {
            session_id: session_id.to_string(),
            reason,
        };

        let value: serde_yaml::Value =
            serde_yaml::from_slice(&content).map_err(|e| corrupted(e.to_string()))?;

        match value.get("mode").and_then(serde_yaml::Value::as_str) {
            Some(mode) if !mode.trim().is_empty() => {}
            _ => return Err(corrupted("missing or empty 'mode'".to_string())),
        }
        if !value.get("stages").is_some_and(serde_yaml::Value::is_sequence) {
            return Err(corrupted("missing 'stages' list".to_string()));
        }

        let session: OrchestratorSession =
            serde_yaml::from_value(value).map_err(|e| corrupted(e.to_string()))?;
        if session.session_id != session_id {
            return Err(corrupted(format!(
                "record names session '{}'",
                session.session_id
            )));
        }
        Ok(session)
    }

    /// Returns every stored session id, most recently modified first.
    pub fn list(&self) -> Result<Vec<String>, SessionError> {
        let mut entries: Vec<(SystemTime, String)> = Vec::new();
        for path in self.store.list_files(SESSIONS_DIR)? {
            if path.extension().and_then(|ext| ext.to_str()) != Some(SESSION_EXTENSION) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let Some(modified) = self.store.modified(&path)? else {
                continue;
            };
            entries.push((modified, id.to_string()));
        }
        entries.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
        Ok(entries.into_iter().map(|(_, id)| id).collect())
    }

    /// Returns the id of the most recently modified session, if any.
    pub fn find_latest(&self) -> Result<Option<String>, SessionError> {
        Ok(self.list()?.into_iter().next())
    }

    /// Deletes a session record. Returns `false` if it did not exist.
    pub fn delete(&self, session_id: &str) -> Result<bool, SessionError> {
        let removed = self.store.delete(Self::record_path(session_id))?;
        if removed {
            info!(session_id, "Session deleted");
        }
        Ok(removed)
    }

    /// Returns true if a record exists for the session.
    pub fn exists(&self, session_id: &str) -> Result<bool, StoreError> {
        self.store.exists(Self::record_path(session_id))
    }
}
