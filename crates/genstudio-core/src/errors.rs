use crate::ids::{ProviderId, SessionId, TaskId};
use crate::task::TaskStatus;

/// Errors returned by a generation provider before they are folded into a
/// failed task.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Provider reported a failure (HTTP status, content policy, quota, etc.).
    #[error("provider error ({provider}): {message}")]
    Provider {
        provider: ProviderId,
        message: String,
        status_code: Option<u16>,
    },
    /// The provider could not be reached or the connection broke.
    #[error("transport error ({provider}): {message}")]
    Transport {
        provider: ProviderId,
        message: String,
    },
    /// The provider answered with a malformed response.
    #[error("protocol error ({provider}): {message}")]
    Protocol {
        provider: ProviderId,
        message: String,
    },
    /// The call did not finish within the task timeout.
    #[error("provider call timed out ({provider}) after {timeout_ms} ms")]
    Timeout { provider: ProviderId, timeout_ms: u64 },
}

impl ProviderError {
    /// Creates a provider-level error.
    pub fn provider(
        provider: impl Into<ProviderId>,
        message: impl Into<String>,
        status_code: Option<u16>,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            status_code,
        }
    }

    /// Creates a transport-level error.
    pub fn transport(provider: impl Into<ProviderId>, message: impl Into<String>) -> Self {
        Self::Transport {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Creates a protocol-level error.
    pub fn protocol(provider: impl Into<ProviderId>, message: impl Into<String>) -> Self {
        Self::Protocol {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Returns the provider associated with this error.
    pub fn provider_id(&self) -> &ProviderId {
        match self {
            Self::Provider { provider, .. }
            | Self::Transport { provider, .. }
            | Self::Protocol { provider, .. }
            | Self::Timeout { provider, .. } => provider,
        }
    }
}

/// Top-level error type for the tracker API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: SessionId },
    #[error("task not found: {task_id} (session {session_id})")]
    TaskNotFound {
        session_id: SessionId,
        task_id: TaskId,
    },
    #[error("duplicate task: {task_id} (session {session_id})")]
    DuplicateTask {
        session_id: SessionId,
        task_id: TaskId,
    },
    /// A freshly minted identifier collided with an existing one.
    #[error("identifier collision while allocating {id}")]
    Allocation { id: String },
    #[error(transparent)]
    Provider(ProviderError),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("invalid task transition for {task_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },
    /// Only queued tasks can be cancelled.
    #[error("task {task_id} is already {status:?} and cannot be cancelled")]
    TaskNotCancellable { task_id: TaskId, status: TaskStatus },
    #[error("config error: {0}")]
    Config(String),
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl TrackerError {
    pub(crate) fn session_not_found(session_id: &SessionId) -> Self {
        Self::SessionNotFound {
            session_id: session_id.clone(),
        }
    }

    pub(crate) fn task_not_found(session_id: &SessionId, task_id: &TaskId) -> Self {
        Self::TaskNotFound {
            session_id: session_id.clone(),
            task_id: task_id.clone(),
        }
    }

    /// Short machine-readable kind used in `error` event payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionNotFound { .. } => "session_not_found",
            Self::TaskNotFound { .. } => "task_not_found",
            Self::DuplicateTask { .. } => "duplicate_task",
            Self::Allocation { .. } => "allocation",
            Self::Provider(_) => "provider",
            Self::Validation(_) => "validation",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::TaskNotCancellable { .. } => "task_not_cancellable",
            Self::Config(_) => "config",
            Self::Persistence(_) => "persistence",
        }
    }
}

impl From<ProviderError> for TrackerError {
    fn from(value: ProviderError) -> Self {
        TrackerError::Provider(value)
    }
}

impl From<std::io::Error> for TrackerError {
    fn from(value: std::io::Error) -> Self {
        TrackerError::Persistence(value.to_string())
    }
}

impl From<serde_json::Error> for TrackerError {
    fn from(value: serde_json::Error) -> Self {
        TrackerError::Persistence(value.to_string())
    }
}

/// Serializable error payload carried by `error` events.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ErrorDescriptor {
    pub kind: String,
    pub message: String,
}

impl From<&TrackerError> for ErrorDescriptor {
    fn from(err: &TrackerError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}
