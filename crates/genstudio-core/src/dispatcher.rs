//! Task dispatcher: hands tasks to the provider off the caller's path and
//! folds the outcome back into the store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::errors::{ProviderError, TrackerError};
use crate::ids::{IdGenerator, ImageId, ProviderId, SessionId, TaskId};
use crate::image::{GeneratedImage, ImageStatus};
use crate::params::ImageGenerationParams;
use crate::provider::{GenerationProvider, GenerationRequest, ProviderImage};
use crate::store::{Resolution, SessionStore};
use crate::task::{GenerationTask, TaskOutcome};

/// Stand-in deadline for timeouts too large to add to `Instant::now()`.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Submits tasks and drives each one through a single provider call.
///
/// There are no retries: a failed task stays failed and callers resubmit.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<SessionStore>,
    provider: Arc<dyn GenerationProvider>,
    permits: Arc<Semaphore>,
    default_timeout: Duration,
    ids: IdGenerator,
}

impl Dispatcher {
    pub fn new(
        store: Arc<SessionStore>,
        provider: Arc<dyn GenerationProvider>,
        max_concurrent: usize,
        default_timeout: Duration,
        ids: IdGenerator,
    ) -> Self {
        Self {
            store,
            provider,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            default_timeout,
            ids,
        }
    }

    /// Registers a queued task and starts dispatching it in the background.
    /// Returns as soon as the task is registered.
    pub async fn submit(
        &self,
        session_id: &SessionId,
        prompt: impl Into<String>,
        params: ImageGenerationParams,
    ) -> Result<TaskId, TrackerError> {
        self.submit_with_timeout(session_id, prompt, params, self.default_timeout)
            .await
    }

    /// Same as `submit` with a per-task timeout.
    pub async fn submit_with_timeout(
        &self,
        session_id: &SessionId,
        prompt: impl Into<String>,
        params: ImageGenerationParams,
        timeout: Duration,
    ) -> Result<TaskId, TrackerError> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(TrackerError::Validation("prompt must not be empty".into()));
        }
        if timeout.is_zero() {
            return Err(TrackerError::Validation(
                "timeout must be greater than 0".into(),
            ));
        }
        params.validate()?;

        let task_id = TaskId::new(self.ids.next_id());
        let task = GenerationTask::new(task_id.clone(), session_id.clone(), prompt, params);
        self.store.enqueue_task(session_id, task.clone()).await?;

        tokio::spawn(dispatch_task(
            self.store.clone(),
            self.provider.clone(),
            self.permits.clone(),
            self.ids.clone(),
            task,
            timeout,
        ));
        Ok(task_id)
    }

    /// Number of provider calls that may start right now.
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    /// Stops dispatching. Tasks still waiting for a slot fail from `queued`;
    /// calls already in flight run to completion or timeout.
    pub fn shutdown(&self) {
        self.permits.close();
    }
}

async fn dispatch_task(
    store: Arc<SessionStore>,
    provider: Arc<dyn GenerationProvider>,
    permits: Arc<Semaphore>,
    ids: IdGenerator,
    task: GenerationTask,
    timeout: Duration,
) {
    let session_id = task.session_id.clone();
    let task_id = task.id.clone();

    let _permit = match permits.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            let outcome =
                TaskOutcome::Failed("dispatcher shut down before the task was dispatched".into());
            resolve(&store, &session_id, &task_id, outcome).await;
            return;
        }
    };

    // One budget covers the readiness check and the generation call.
    let deadline = Instant::now()
        .checked_add(timeout)
        .unwrap_or_else(|| Instant::now() + FAR_FUTURE);
    let provider_id = provider.id();

    let ready = match tokio::time::timeout_at(deadline, provider.ready()).await {
        Ok(ready) => ready,
        Err(_) => Err(timeout_error(&provider_id, timeout)),
    };
    if let Err(err) = ready {
        warn!(session_id = %session_id, task_id = %task_id, provider = %provider_id, error = %err, "provider not ready");
        resolve(
            &store,
            &session_id,
            &task_id,
            TaskOutcome::Failed(format!("dispatch failed: {err}")),
        )
        .await;
        return;
    }

    // Cancelled while waiting for a slot, or the session went away.
    if let Err(err) = store.begin_processing(&session_id, &task_id).await {
        debug!(session_id = %session_id, task_id = %task_id, error = %err, "skipping dispatch");
        return;
    }

    let request = GenerationRequest {
        task_id: task_id.clone(),
        session_id: session_id.clone(),
        prompt: task.prompt.clone(),
        params: task.params.clone(),
    };
    debug!(session_id = %session_id, task_id = %task_id, provider = %provider_id, timeout_ms = millis(timeout), "calling provider");

    let outcome = match tokio::time::timeout_at(deadline, provider.generate(request)).await {
        Ok(Ok(image)) => build_outcome(&task, image, &ids, &provider_id),
        Ok(Err(err)) => TaskOutcome::Failed(err.to_string()),
        Err(_) => {
            warn!(session_id = %session_id, task_id = %task_id, provider = %provider_id, "provider call timed out");
            TaskOutcome::Failed(timeout_error(&provider_id, timeout).to_string())
        }
    };
    resolve(&store, &session_id, &task_id, outcome).await;
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn timeout_error(provider_id: &ProviderId, timeout: Duration) -> ProviderError {
    ProviderError::Timeout {
        provider: provider_id.clone(),
        timeout_ms: millis(timeout),
    }
}

fn build_outcome(
    task: &GenerationTask,
    image: ProviderImage,
    ids: &IdGenerator,
    provider_id: &ProviderId,
) -> TaskOutcome {
    if image.reference.is_empty() {
        let err = ProviderError::protocol(
            provider_id.clone(),
            "response carried an empty image reference",
        );
        return TaskOutcome::Failed(err.to_string());
    }
    TaskOutcome::Completed(GeneratedImage {
        id: image.id.unwrap_or_else(|| ImageId::new(ids.next_id())),
        prompt: task.prompt.clone(),
        image: image.reference,
        params: task.params.clone(),
        created_at: Utc::now(),
        status: ImageStatus::Completed,
    })
}

async fn resolve(
    store: &SessionStore,
    session_id: &SessionId,
    task_id: &TaskId,
    outcome: TaskOutcome,
) {
    match store.resolve_task(session_id, task_id, outcome).await {
        Ok(Resolution::Applied(task)) => {
            debug!(session_id = %session_id, task_id = %task_id, status = ?task.status(), "dispatch finished");
        }
        Ok(Resolution::AlreadyResolved(_)) => {
            warn!(session_id = %session_id, task_id = %task_id, "late dispatch result discarded");
        }
        Err(err) => {
            warn!(session_id = %session_id, task_id = %task_id, error = %err, "could not record dispatch result");
        }
    }
}
