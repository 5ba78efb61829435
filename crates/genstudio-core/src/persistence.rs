//! Get/put-by-id storage for session snapshots.

use std::path::{Path, PathBuf};

use dashmap::DashMap;
use tracing::debug;

use crate::errors::TrackerError;
use crate::ids::SessionId;
use crate::session::SessionSnapshot;

/// External store for session snapshots.
#[async_trait::async_trait]
pub trait SessionRepository: Send + Sync {
    async fn get(&self, id: &SessionId) -> Result<Option<SessionSnapshot>, TrackerError>;

    /// Inserts or replaces the snapshot stored under its session id.
    async fn put(&self, snapshot: SessionSnapshot) -> Result<(), TrackerError>;
}

/// Process-local repository, mostly useful for tests and demos.
#[derive(Default)]
pub struct InMemorySessionRepository {
    snapshots: DashMap<SessionId, SessionSnapshot>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

#[async_trait::async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn get(&self, id: &SessionId) -> Result<Option<SessionSnapshot>, TrackerError> {
        Ok(self.snapshots.get(id).map(|entry| entry.value().clone()))
    }

    async fn put(&self, snapshot: SessionSnapshot) -> Result<(), TrackerError> {
        self.snapshots.insert(snapshot.id().clone(), snapshot);
        Ok(())
    }
}

/// Stores one pretty-printed JSON file per session (`<id>.json`) in a
/// directory. Writes go to a temporary file that is renamed into place.
#[derive(Clone, Debug)]
pub struct JsonFileSessionRepository {
    dir: PathBuf,
}

impl JsonFileSessionRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &SessionId) -> Result<PathBuf, TrackerError> {
        let raw = id.as_str();
        if raw.is_empty()
            || raw == "."
            || raw == ".."
            || raw.contains(['/', '\\'])
        {
            return Err(TrackerError::Persistence(format!(
                "session id {raw:?} is not usable as a file name"
            )));
        }
        Ok(self.dir.join(format!("{raw}.json")))
    }
}

#[async_trait::async_trait]
impl SessionRepository for JsonFileSessionRepository {
    async fn get(&self, id: &SessionId) -> Result<Option<SessionSnapshot>, TrackerError> {
        let path = self.path_for(id)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn put(&self, snapshot: SessionSnapshot) -> Result<(), TrackerError> {
        let path = self.path_for(snapshot.id())?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let body = serde_json::to_vec_pretty(&snapshot)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(session_id = %snapshot.id(), path = %path.display(), "session snapshot written");
        Ok(())
    }
}
