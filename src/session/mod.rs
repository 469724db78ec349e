//! Session persistence and the live registry
//!
//! Sessions persist as two files: `<id>.json` with the full record and
//! `<id>.summary.json` with the listing view, so `list_saved` stays O(n) in
//! sessions without ever reading part-result bodies. Writes go through a
//! temp file + rename so readers never observe a torn record.

use crate::analyzer::{AnalysisSession, CancellationToken, SessionId, SessionSummary};
use dashmap::DashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Errors from session persistence
#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

const SUMMARY_SUFFIX: &str = ".summary.json";

/// On-disk session store.
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Open (and create) the store directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, SessionStoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn session_path(&self, id: &SessionId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn summary_path(&self, id: &SessionId) -> PathBuf {
        self.dir.join(format!("{}{}", id, SUMMARY_SUFFIX))
    }

    /// Persist a session snapshot (full record + summary sidecar).
    pub fn save(&self, session: &AnalysisSession) -> Result<(), SessionStoreError> {
        write_atomic(
            &self.session_path(&session.id),
            &serde_json::to_vec_pretty(session)?,
        )?;
        let summary = SessionSummary::from(session);
        write_atomic(
            &self.summary_path(&session.id),
            &serde_json::to_vec_pretty(&summary)?,
        )?;
        Ok(())
    }

    /// Load a full session by id.
    pub fn load(&self, id: &SessionId) -> Result<Option<AnalysisSession>, SessionStoreError> {
        let path = self.session_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// All saved session summaries, most recently started first. Reads only
    /// the summary sidecars.
    pub fn list_summaries(&self) -> Result<Vec<SessionSummary>, SessionStoreError> {
        let mut summaries = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.ends_with(SUMMARY_SUFFIX) {
                continue;
            }
            let bytes = fs::read(entry.path())?;
            match serde_json::from_slice::<SessionSummary>(&bytes) {
                Ok(summary) => summaries.push(summary),
                Err(err) => {
                    tracing::warn!(file = name, error = %err, "skipping unreadable session summary");
                }
            }
        }
        summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at).then_with(|| a.id.cmp(&b.id)));
        Ok(summaries)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SessionStoreError> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// A live session: the shared mutable record plus its cancellation token.
/// Status readers take the read lock for a consistent snapshot; only the
/// owning orchestrator task writes.
#[derive(Clone)]
pub struct SessionHandle {
    pub session: Arc<RwLock<AnalysisSession>>,
    pub cancel: CancellationToken,
}

impl SessionHandle {
    pub fn new(session: AnalysisSession) -> Self {
        Self {
            session: Arc::new(RwLock::new(session)),
            cancel: CancellationToken::new(),
        }
    }

    /// A consistent snapshot of the current session state.
    pub fn snapshot(&self) -> AnalysisSession {
        self.session.read().unwrap().clone()
    }
}

/// In-process registry of live (and recently finished) sessions.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, SessionHandle>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn insert(&self, handle: SessionHandle) {
        let id = handle.session.read().unwrap().id.to_string();
        self.sessions.insert(id, handle);
    }

    pub fn get(&self, id: &SessionId) -> Option<SessionHandle> {
        self.sessions.get(id.as_str()).map(|h| h.value().clone())
    }
}
