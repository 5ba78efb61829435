//! Session store: exclusive owner of all session state.
//!
//! Each session sits behind its own mutex, so mutations of one session are
//! serialized while different sessions never contend. Every task transition
//! is published to the notification hub before the session lock is released.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::{ErrorDescriptor, TrackerError};
use crate::ids::{IdGenerator, ImageId, SessionId, TaskId};
use crate::notify::{EventPayload, NotificationHub, Subscription};
use crate::params::ImageGenerationParams;
use crate::persistence::SessionRepository;
use crate::session::{SessionData, SessionSnapshot};
use crate::task::{GenerationTask, TaskOutcome, TaskStatus, not_before};

const CANCELLED_MESSAGE: &str = "cancelled before dispatch";
const INTERRUPTED_MESSAGE: &str = "interrupted before completion";

/// Finished tasks remembered per session unless configured otherwise.
pub const DEFAULT_FINISHED_RETENTION: usize = 256;

/// Result of `SessionStore::resolve_task`.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The outcome was merged; carries the terminal task snapshot.
    Applied(GenerationTask),
    /// The task had already been resolved; nothing changed.
    AlreadyResolved(GenerationTask),
}

impl Resolution {
    pub fn task(&self) -> &GenerationTask {
        match self {
            Self::Applied(task) | Self::AlreadyResolved(task) => task,
        }
    }
}

struct SessionState {
    data: SessionData,
    /// Most recent terminal tasks, kept so later reads and duplicate
    /// resolutions see them. Bounded by `finished_order`.
    finished: HashMap<TaskId, GenerationTask>,
    finished_order: VecDeque<TaskId>,
    /// Every image id ever appended, including ones trimmed by retention.
    seen_images: HashSet<ImageId>,
}

impl SessionState {
    fn new(data: SessionData) -> Self {
        let seen_images = data.history.iter().map(|image| image.id.clone()).collect();
        Self {
            data,
            finished: HashMap::new(),
            finished_order: VecDeque::new(),
            seen_images,
        }
    }

    fn touch(&mut self) {
        self.data.last_accessed = not_before(self.data.last_accessed);
    }

    fn queued_position(&self, task_id: &TaskId) -> Option<usize> {
        self.data
            .queued_tasks
            .iter()
            .position(|task| &task.id == task_id)
    }

    fn next_image_timestamp(&self) -> DateTime<Utc> {
        match self.data.history.last() {
            Some(last) => {
                let floor = last.created_at + chrono::Duration::microseconds(1);
                Utc::now().max(floor)
            }
            None => Utc::now(),
        }
    }

    /// Records a terminal task, forgetting the oldest ones beyond `cap`.
    fn record_finished(&mut self, task: GenerationTask, cap: usize) {
        if self.finished.insert(task.id.clone(), task.clone()).is_none() {
            self.finished_order.push_back(task.id);
        }
        while self.finished_order.len() > cap {
            if let Some(oldest) = self.finished_order.pop_front() {
                self.finished.remove(&oldest);
            }
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        let finished_tasks = self
            .finished_order
            .iter()
            .filter_map(|id| self.finished.get(id).cloned())
            .collect();
        SessionSnapshot {
            session: self.data.clone(),
            finished_tasks,
        }
    }
}

/// In-memory store for sessions, their history, settings and queued tasks.
pub struct SessionStore {
    sessions: DashMap<SessionId, Arc<Mutex<SessionState>>>,
    hub: Arc<NotificationHub>,
    ids: IdGenerator,
    max_history: Option<usize>,
    finished_retention: usize,
}

impl SessionStore {
    pub fn new(hub: Arc<NotificationHub>, ids: IdGenerator, max_history: Option<usize>) -> Self {
        Self {
            sessions: DashMap::new(),
            hub,
            ids,
            max_history,
            finished_retention: DEFAULT_FINISHED_RETENTION,
        }
    }

    /// Caps how many finished tasks each session remembers. Older ones can
    /// no longer be read back and a late resolution for them is reported as
    /// `TaskNotFound`.
    pub fn with_finished_retention(mut self, cap: usize) -> Self {
        self.finished_retention = cap.max(1);
        self
    }

    fn handle(&self, session_id: &SessionId) -> Result<Arc<Mutex<SessionState>>, TrackerError> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TrackerError::session_not_found(session_id))
    }

    fn publish_task(&self, task: &GenerationTask) {
        self.hub
            .publish(&task.session_id, EventPayload::TaskUpdate(task.clone()));
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Allocates an empty session with default settings.
    ///
    /// Fails with `Allocation` if the minted id is already taken; callers
    /// retry with a fresh id.
    pub fn create_session(&self) -> Result<SessionData, TrackerError> {
        let id = SessionId::new(self.ids.next_id());
        match self.sessions.entry(id.clone()) {
            Entry::Occupied(_) => Err(TrackerError::Allocation { id: id.0 }),
            Entry::Vacant(slot) => {
                let data = SessionData::new(id.clone());
                slot.insert(Arc::new(Mutex::new(SessionState::new(data.clone()))));
                self.hub.open(&id);
                info!(session_id = %id, "session created");
                Ok(data)
            }
        }
    }

    /// Returns the session and refreshes its `last_accessed` timestamp.
    pub async fn get_session(&self, session_id: &SessionId) -> Result<SessionData, TrackerError> {
        let handle = self.handle(session_id)?;
        let mut state = handle.lock().await;
        state.touch();
        Ok(state.data.clone())
    }

    /// Replaces the current settings wholesale.
    pub async fn update_settings(
        &self,
        session_id: &SessionId,
        params: ImageGenerationParams,
    ) -> Result<(), TrackerError> {
        params.validate()?;
        let handle = self.handle(session_id)?;
        let mut state = handle.lock().await;
        state.touch();
        state.data.current_settings = params;
        debug!(session_id = %session_id, "session settings replaced");
        Ok(())
    }

    /// Adds a queued task to the session.
    pub async fn enqueue_task(
        &self,
        session_id: &SessionId,
        task: GenerationTask,
    ) -> Result<(), TrackerError> {
        if &task.session_id != session_id {
            return Err(TrackerError::Validation(format!(
                "task {} belongs to session {}, not {session_id}",
                task.id, task.session_id
            )));
        }
        if task.status() != TaskStatus::Queued {
            return Err(TrackerError::Validation(format!(
                "task {} must be queued when enqueued, found {:?}",
                task.id,
                task.status()
            )));
        }
        let handle = self.handle(session_id)?;
        let mut state = handle.lock().await;
        if state.queued_position(&task.id).is_some() || state.finished.contains_key(&task.id) {
            return Err(TrackerError::DuplicateTask {
                session_id: session_id.clone(),
                task_id: task.id,
            });
        }
        state.touch();
        debug!(session_id = %session_id, task_id = %task.id, "task queued");
        self.publish_task(&task);
        state.data.queued_tasks.push(task);
        Ok(())
    }

    /// Latest snapshot of a task, whether still queued or already finished.
    pub async fn task(
        &self,
        session_id: &SessionId,
        task_id: &TaskId,
    ) -> Result<GenerationTask, TrackerError> {
        let handle = self.handle(session_id)?;
        let mut state = handle.lock().await;
        state.touch();
        if let Some(pos) = state.queued_position(task_id) {
            return Ok(state.data.queued_tasks[pos].clone());
        }
        state
            .finished
            .get(task_id)
            .cloned()
            .ok_or_else(|| TrackerError::task_not_found(session_id, task_id))
    }

    /// Applies `queued -> processing`.
    pub async fn begin_processing(
        &self,
        session_id: &SessionId,
        task_id: &TaskId,
    ) -> Result<GenerationTask, TrackerError> {
        let handle = self.handle(session_id)?;
        let mut state = handle.lock().await;
        let Some(pos) = state.queued_position(task_id) else {
            return Err(match state.finished.get(task_id) {
                Some(task) => TrackerError::InvalidTransition {
                    task_id: task_id.clone(),
                    from: task.status(),
                    to: TaskStatus::Processing,
                },
                None => TrackerError::task_not_found(session_id, task_id),
            });
        };
        state.touch();
        let task = &mut state.data.queued_tasks[pos];
        task.start_processing()?;
        let snapshot = task.clone();
        debug!(session_id = %session_id, task_id = %task_id, "task processing");
        self.publish_task(&snapshot);
        Ok(snapshot)
    }

    /// Merges a task outcome into the session exactly once.
    ///
    /// A successful outcome appends the image to history unless its id was
    /// already seen, which is logged and otherwise ignored. Resolving a task
    /// that already finished returns `Resolution::AlreadyResolved`.
    pub async fn resolve_task(
        &self,
        session_id: &SessionId,
        task_id: &TaskId,
        outcome: TaskOutcome,
    ) -> Result<Resolution, TrackerError> {
        let handle = self.handle(session_id)?;
        let mut state = handle.lock().await;
        if let Some(done) = state.finished.get(task_id) {
            warn!(session_id = %session_id, task_id = %task_id, status = ?done.status(), "task already resolved; ignoring outcome");
            return Ok(Resolution::AlreadyResolved(done.clone()));
        }
        let pos = state
            .queued_position(task_id)
            .ok_or_else(|| TrackerError::task_not_found(session_id, task_id))?;

        let mut task = state.data.queued_tasks[pos].clone();
        let mut appended = None;
        match outcome {
            TaskOutcome::Completed(mut image) => {
                image.created_at = state.next_image_timestamp();
                task.complete(image.clone())?;
                if state.seen_images.contains(&image.id) {
                    warn!(session_id = %session_id, task_id = %task_id, image_id = %image.id, "duplicate image id; history left unchanged");
                } else {
                    appended = Some(image);
                }
            }
            TaskOutcome::Failed(message) => task.fail(message)?,
        }

        state.touch();
        if let Some(image) = appended {
            state.seen_images.insert(image.id.clone());
            state.data.history.push(image);
            if let Some(cap) = self.max_history {
                let excess = state.data.history.len().saturating_sub(cap);
                if excess > 0 {
                    state.data.history.drain(..excess);
                }
            }
        }
        state.data.queued_tasks.remove(pos);
        state.record_finished(task.clone(), self.finished_retention);
        debug!(session_id = %session_id, task_id = %task_id, status = ?task.status(), "task resolved");
        self.publish_task(&task);
        Ok(Resolution::Applied(task))
    }

    /// Best-effort cancellation of a task that has not been dispatched yet.
    ///
    /// Already finished tasks are returned unchanged.
    pub async fn cancel_task(
        &self,
        session_id: &SessionId,
        task_id: &TaskId,
    ) -> Result<GenerationTask, TrackerError> {
        let handle = self.handle(session_id)?;
        let mut state = handle.lock().await;
        state.touch();
        if let Some(done) = state.finished.get(task_id) {
            return Ok(done.clone());
        }
        let pos = state
            .queued_position(task_id)
            .ok_or_else(|| TrackerError::task_not_found(session_id, task_id))?;
        let status = state.data.queued_tasks[pos].status();
        if status != TaskStatus::Queued {
            return Err(TrackerError::TaskNotCancellable {
                task_id: task_id.clone(),
                status,
            });
        }
        let mut task = state.data.queued_tasks.remove(pos);
        task.fail(CANCELLED_MESSAGE)?;
        state.record_finished(task.clone(), self.finished_retention);
        info!(session_id = %session_id, task_id = %task_id, "task cancelled");
        self.publish_task(&task);
        Ok(task)
    }

    /// Subscribes to task updates of an existing session.
    pub fn subscribe(&self, session_id: &SessionId) -> Result<Subscription, TrackerError> {
        if !self.contains(session_id) {
            return Err(TrackerError::session_not_found(session_id));
        }
        Ok(self.hub.subscribe(session_id))
    }

    /// Publishes an `error` event on behalf of an integration.
    pub fn publish_error(
        &self,
        session_id: &SessionId,
        error: &TrackerError,
    ) -> Result<u64, TrackerError> {
        self.hub
            .publish(session_id, EventPayload::Error(ErrorDescriptor::from(error)))
            .ok_or_else(|| TrackerError::session_not_found(session_id))
    }

    /// Drops a session and ends its subscriptions.
    pub async fn remove_session(&self, session_id: &SessionId) -> Result<SessionData, TrackerError> {
        let (_, handle) = self
            .sessions
            .remove(session_id)
            .ok_or_else(|| TrackerError::session_not_found(session_id))?;
        self.hub.close_session(session_id);
        let state = handle.lock().await;
        info!(session_id = %session_id, "session removed");
        Ok(state.data.clone())
    }

    /// Removes sessions that have not been accessed for longer than
    /// `max_idle` and returns their ids.
    pub async fn evict_idle(&self, max_idle: Duration) -> Vec<SessionId> {
        let Ok(max_idle) = chrono::Duration::from_std(max_idle) else {
            return Vec::new();
        };
        let cutoff = Utc::now() - max_idle;
        let handles: Vec<(SessionId, Arc<Mutex<SessionState>>)> = self
            .sessions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut evicted = Vec::new();
        for (id, handle) in handles {
            // Hold the session lock until it is out of the map so no access
            // can slip in between the idle check and the removal.
            let state = handle.lock().await;
            if state.data.last_accessed >= cutoff {
                continue;
            }
            let removed = self
                .sessions
                .remove_if(&id, |_, current| Arc::ptr_eq(current, &handle))
                .is_some();
            drop(state);
            if removed {
                self.hub.close_session(&id);
                info!(session_id = %id, "idle session evicted");
                evicted.push(id);
            }
        }
        evicted
    }

    /// Returns the persisted form of a session.
    pub async fn snapshot(&self, session_id: &SessionId) -> Result<SessionSnapshot, TrackerError> {
        let handle = self.handle(session_id)?;
        let mut state = handle.lock().await;
        state.touch();
        Ok(state.snapshot())
    }

    pub async fn persist_session(
        &self,
        session_id: &SessionId,
        repository: &dyn SessionRepository,
    ) -> Result<(), TrackerError> {
        let snapshot = self.snapshot(session_id).await?;
        repository.put(snapshot).await
    }

    /// Reinstates a persisted session.
    ///
    /// Tasks that were still in flight when the snapshot was taken cannot be
    /// resumed; they are recorded as failed. Emits `session_restored`.
    pub fn restore_session(&self, snapshot: SessionSnapshot) -> Result<SessionData, TrackerError> {
        self.restore_with(snapshot, |_| ()).map(|(data, ())| data)
    }

    /// Like `restore_session`, but also returns a subscription opened before
    /// the `session_restored` event is published.
    pub fn restore_and_subscribe(
        &self,
        snapshot: SessionSnapshot,
    ) -> Result<(SessionData, Subscription), TrackerError> {
        self.restore_with(snapshot, |id| self.hub.subscribe(id))
    }

    fn restore_with<T>(
        &self,
        snapshot: SessionSnapshot,
        before_publish: impl FnOnce(&SessionId) -> T,
    ) -> Result<(SessionData, T), TrackerError> {
        let SessionSnapshot {
            session: mut data,
            finished_tasks,
        } = snapshot;
        let id = data.id.clone();

        let interrupted = std::mem::take(&mut data.queued_tasks);
        data.last_accessed = not_before(data.last_accessed.max(data.created_at));
        let mut state = SessionState::new(data.clone());
        for task in finished_tasks {
            if task.status().is_terminal() {
                state.record_finished(task, self.finished_retention);
            }
        }
        for mut task in interrupted {
            task.fail(INTERRUPTED_MESSAGE)?;
            state.record_finished(task, self.finished_retention);
        }

        match self.sessions.entry(id.clone()) {
            Entry::Occupied(_) => Err(TrackerError::Allocation { id: id.0 }),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(state)));
                self.hub.open(&id);
                let extra = before_publish(&id);
                self.hub
                    .publish(&id, EventPayload::SessionRestored(data.clone()));
                info!(session_id = %id, images = data.history.len(), "session restored");
                Ok((data, extra))
            }
        }
    }

    async fn fetch_snapshot(
        session_id: &SessionId,
        repository: &dyn SessionRepository,
    ) -> Result<SessionSnapshot, TrackerError> {
        repository
            .get(session_id)
            .await?
            .ok_or_else(|| TrackerError::session_not_found(session_id))
    }

    /// Loads a session from `repository` and restores it.
    pub async fn load_session(
        &self,
        session_id: &SessionId,
        repository: &dyn SessionRepository,
    ) -> Result<SessionData, TrackerError> {
        let snapshot = Self::fetch_snapshot(session_id, repository).await?;
        self.restore_session(snapshot)
    }

    /// Loads and restores a session, returning a subscription that sees the
    /// `session_restored` event.
    pub async fn load_and_subscribe(
        &self,
        session_id: &SessionId,
        repository: &dyn SessionRepository,
    ) -> Result<(SessionData, Subscription), TrackerError> {
        let snapshot = Self::fetch_snapshot(session_id, repository).await?;
        self.restore_and_subscribe(snapshot)
    }
}
