use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::config::TrackerConfig;
use crate::dispatcher::Dispatcher;
use crate::errors::TrackerError;
use crate::ids::{IdGenerator, SessionId, TaskId};
use crate::notify::{NotificationHub, Subscription};
use crate::params::ImageGenerationParams;
use crate::persistence::SessionRepository;
use crate::provider::GenerationProvider;
use crate::session::SessionData;
use crate::store::SessionStore;
use crate::task::GenerationTask;

const ALLOCATION_ATTEMPTS: usize = 3;

/// Entry point wiring the session store, dispatcher and notifications.
#[derive(Clone)]
pub struct Tracker {
    store: Arc<SessionStore>,
    dispatcher: Dispatcher,
    config: TrackerConfig,
}

impl Tracker {
    pub fn builder() -> TrackerBuilder {
        TrackerBuilder::default()
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Direct access to the store for integrations that resolve tasks
    /// themselves.
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Creates a session, retrying with a fresh id on collision.
    pub fn create_session(&self) -> Result<SessionData, TrackerError> {
        let mut last_err = None;
        for _ in 0..ALLOCATION_ATTEMPTS {
            match self.store.create_session() {
                Ok(data) => return Ok(data),
                Err(err @ TrackerError::Allocation { .. }) => {
                    warn!(error = %err, "session id collision; retrying with a new id");
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or_else(|| TrackerError::Allocation { id: String::new() }))
    }

    pub async fn session(&self, session_id: &SessionId) -> Result<SessionData, TrackerError> {
        self.store.get_session(session_id).await
    }

    pub async fn update_settings(
        &self,
        session_id: &SessionId,
        params: ImageGenerationParams,
    ) -> Result<(), TrackerError> {
        self.store.update_settings(session_id, params).await
    }

    pub async fn submit(
        &self,
        session_id: &SessionId,
        prompt: impl Into<String>,
        params: ImageGenerationParams,
    ) -> Result<TaskId, TrackerError> {
        self.dispatcher.submit(session_id, prompt, params).await
    }

    /// Submits using the session's current settings as the parameter snapshot.
    pub async fn submit_with_current_settings(
        &self,
        session_id: &SessionId,
        prompt: impl Into<String>,
    ) -> Result<TaskId, TrackerError> {
        let settings = self.store.get_session(session_id).await?.current_settings;
        self.dispatcher.submit(session_id, prompt, settings).await
    }

    pub async fn submit_with_timeout(
        &self,
        session_id: &SessionId,
        prompt: impl Into<String>,
        params: ImageGenerationParams,
        timeout: Duration,
    ) -> Result<TaskId, TrackerError> {
        self.dispatcher
            .submit_with_timeout(session_id, prompt, params, timeout)
            .await
    }

    pub async fn task(
        &self,
        session_id: &SessionId,
        task_id: &TaskId,
    ) -> Result<GenerationTask, TrackerError> {
        self.store.task(session_id, task_id).await
    }

    /// Best-effort cancel of a task that is still waiting for dispatch.
    pub async fn cancel(
        &self,
        session_id: &SessionId,
        task_id: &TaskId,
    ) -> Result<GenerationTask, TrackerError> {
        self.store.cancel_task(session_id, task_id).await
    }

    pub fn subscribe(&self, session_id: &SessionId) -> Result<Subscription, TrackerError> {
        self.store.subscribe(session_id)
    }

    /// Publishes an `error` event for the session, returning its sequence
    /// number.
    pub fn publish_error(
        &self,
        session_id: &SessionId,
        error: &TrackerError,
    ) -> Result<u64, TrackerError> {
        self.store.publish_error(session_id, error)
    }

    pub async fn remove_session(&self, session_id: &SessionId) -> Result<SessionData, TrackerError> {
        self.store.remove_session(session_id).await
    }

    /// Evicts sessions idle for longer than `session_idle_ttl`. No-op when
    /// no TTL is configured.
    pub async fn evict_idle(&self) -> Vec<SessionId> {
        match self.config.session_idle_ttl {
            Some(ttl) => self.store.evict_idle(ttl).await,
            None => Vec::new(),
        }
    }

    pub async fn persist_session(
        &self,
        session_id: &SessionId,
        repository: &dyn SessionRepository,
    ) -> Result<(), TrackerError> {
        self.store.persist_session(session_id, repository).await
    }

    pub async fn restore_session(
        &self,
        session_id: &SessionId,
        repository: &dyn SessionRepository,
    ) -> Result<SessionData, TrackerError> {
        self.store.load_session(session_id, repository).await
    }

    /// Restores a session and subscribes to it in one step, so the returned
    /// subscription starts with the `session_restored` event.
    pub async fn restore_session_and_subscribe(
        &self,
        session_id: &SessionId,
        repository: &dyn SessionRepository,
    ) -> Result<(SessionData, Subscription), TrackerError> {
        self.store.load_and_subscribe(session_id, repository).await
    }

    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
    }
}

/// Builder for a `Tracker`. A provider is required.
#[derive(Default)]
pub struct TrackerBuilder {
    provider: Option<Arc<dyn GenerationProvider>>,
    config: TrackerConfig,
    ids: IdGenerator,
}

impl TrackerBuilder {
    pub fn provider(mut self, provider: Arc<dyn GenerationProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn config(mut self, config: TrackerConfig) -> Self {
        self.config = config;
        self
    }

    /// Overrides how session and task ids are minted.
    pub fn id_generator(mut self, ids: IdGenerator) -> Self {
        self.ids = ids;
        self
    }

    pub fn build(self) -> Result<Tracker, TrackerError> {
        self.config.validate()?;
        let provider = self
            .provider
            .ok_or_else(|| TrackerError::Config("a generation provider is required".into()))?;
        let store = Arc::new(
            SessionStore::new(
                Arc::new(NotificationHub::new()),
                self.ids.clone(),
                self.config.max_history,
            )
            .with_finished_retention(self.config.finished_task_retention),
        );
        let dispatcher = Dispatcher::new(
            store.clone(),
            provider,
            self.config.max_concurrent_dispatches,
            self.config.default_timeout,
            self.ids,
        );
        Ok(Tracker {
            store,
            dispatcher,
            config: self.config,
        })
    }
}
