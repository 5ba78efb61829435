use chrono::{DateTime, Utc};

use crate::ids::SessionId;
use crate::image::GeneratedImage;
use crate::params::ImageGenerationParams;
use crate::task::GenerationTask;

/// Snapshot of a session as seen by callers.
///
/// `history` is append-only with the most recent image last.
/// `queued_tasks` holds every task not yet in a terminal state, in
/// submission order.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub id: SessionId,
    pub history: Vec<GeneratedImage>,
    pub current_settings: ImageGenerationParams,
    pub queued_tasks: Vec<GenerationTask>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

impl SessionData {
    pub(crate) fn new(id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            history: Vec::new(),
            current_settings: ImageGenerationParams::default(),
            queued_tasks: Vec::new(),
            created_at: now,
            last_accessed: now,
        }
    }
}

/// Persisted form of a session: the caller-visible data plus the tasks that
/// already reached a terminal state.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session: SessionData,
    #[serde(default)]
    pub finished_tasks: Vec<GenerationTask>,
}

impl SessionSnapshot {
    pub fn id(&self) -> &SessionId {
        &self.session.id
    }
}
