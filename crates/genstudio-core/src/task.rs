use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::TrackerError;
use crate::ids::{SessionId, TaskId};
use crate::image::GeneratedImage;
use crate::params::ImageGenerationParams;

/// Lifecycle state of a generation task.
///
/// `Queued -> Processing -> {Completed, Failed}`, plus `Queued -> Failed`
/// when dispatch never reaches the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Processing)
                | (Self::Queued, Self::Failed)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

/// Outcome handed to the store when a task resolves.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed(GeneratedImage),
    Failed(String),
}

/// A single generation request tracked from submission to a terminal state.
///
/// `result` is present iff the task completed and `error` is present iff it
/// failed; the transition methods are the only way to change either.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationTask {
    pub id: TaskId,
    pub session_id: SessionId,
    pub prompt: String,
    pub params: ImageGenerationParams,
    status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<GeneratedImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    pub created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl GenerationTask {
    pub fn new(
        id: TaskId,
        session_id: SessionId,
        prompt: impl Into<String>,
        params: ImageGenerationParams,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            session_id,
            prompt: prompt.into(),
            params,
            status: TaskStatus::Queued,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn result(&self) -> Option<&GeneratedImage> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn start_processing(&mut self) -> Result<(), TrackerError> {
        self.transition(TaskStatus::Processing)
    }

    pub fn complete(&mut self, image: GeneratedImage) -> Result<(), TrackerError> {
        self.transition(TaskStatus::Completed)?;
        self.result = Some(image);
        Ok(())
    }

    /// Moves the task to `Failed`. Blank messages are replaced so that a
    /// failed task always carries a non-empty error.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), TrackerError> {
        self.transition(TaskStatus::Failed)?;
        let message = message.into();
        self.error = Some(if message.trim().is_empty() {
            "unknown failure".to_string()
        } else {
            message
        });
        Ok(())
    }

    fn transition(&mut self, next: TaskStatus) -> Result<(), TrackerError> {
        if !self.status.can_transition_to(next) {
            return Err(TrackerError::InvalidTransition {
                task_id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = not_before(self.updated_at);
        Ok(())
    }
}

/// Current time, clamped so it never goes backwards relative to `floor`.
pub(crate) fn not_before(floor: DateTime<Utc>) -> DateTime<Utc> {
    Utc::now().max(floor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ImageId;
    use crate::image::{ImageRef, ImageStatus};

    fn task() -> GenerationTask {
        GenerationTask::new(
            TaskId::new("t-1"),
            SessionId::new("s-1"),
            "sunset",
            ImageGenerationParams::default(),
        )
    }

    fn image() -> GeneratedImage {
        GeneratedImage {
            id: ImageId::new("img-1"),
            prompt: "sunset".into(),
            image: ImageRef::Url("https://example.invalid/1.png".into()),
            params: ImageGenerationParams::default(),
            created_at: Utc::now(),
            status: ImageStatus::Completed,
        }
    }

    #[test]
    fn new_task_is_queued_without_result_or_error() {
        let task = task();
        assert_eq!(task.status(), TaskStatus::Queued);
        assert!(task.result().is_none());
        assert!(task.error().is_none());
        assert_eq!(task.created_at, task.updated_at());
    }

    #[test]
    fn completed_path_sets_result_only() {
        let mut task = task();
        task.start_processing().expect("processing");
        task.complete(image()).expect("complete");
        assert_eq!(task.status(), TaskStatus::Completed);
        assert!(task.result().is_some());
        assert!(task.error().is_none());
        assert!(task.updated_at() >= task.created_at);
    }

    #[test]
    fn queued_task_can_fail_directly_and_blank_errors_are_filled() {
        let mut task = task();
        task.fail("  ").expect("fail");
        assert_eq!(task.status(), TaskStatus::Failed);
        assert_eq!(task.error(), Some("unknown failure"));
        assert!(task.result().is_none());
    }

    #[test]
    fn completion_without_processing_is_rejected() {
        let mut task = task();
        let err = task.complete(image());
        assert!(matches!(
            err,
            Err(TrackerError::InvalidTransition {
                from: TaskStatus::Queued,
                to: TaskStatus::Completed,
                ..
            })
        ));
        assert!(task.result().is_none());
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for terminal in [TaskStatus::Completed, TaskStatus::Failed] {
            for next in [
                TaskStatus::Queued,
                TaskStatus::Processing,
                TaskStatus::Completed,
                TaskStatus::Failed,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }
}
