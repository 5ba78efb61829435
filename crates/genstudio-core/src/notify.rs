//! Per-session publish/subscribe for task updates.
//!
//! Every subscriber owns an unbounded queue, so a slow consumer never causes
//! events to be dropped for it. The store publishes while holding the
//! session's lock, which makes the per-session event order identical to the
//! order in which transitions were applied.

use std::pin::Pin;
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures::Stream;
use tokio::sync::mpsc;
use tracing::debug;

use crate::errors::ErrorDescriptor;
use crate::ids::SessionId;
use crate::session::SessionData;
use crate::task::GenerationTask;

/// Event body. Serialized adjacently tagged as `{ "type": ..., "data": ... }`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    /// Full snapshot of a task after a transition.
    TaskUpdate(GenerationTask),
    SessionRestored(SessionData),
    Error(ErrorDescriptor),
}

/// Message delivered to subscribers.
///
/// `seq` increases by one per published event within a session; consumers
/// can use it to drop duplicate deliveries.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    pub session_id: SessionId,
    pub seq: u64,
    #[serde(flatten)]
    pub payload: EventPayload,
}

/// Wire name used by live UIs for the same message.
pub type WebSocketMessage = SessionEvent;

impl SessionEvent {
    /// Returns the task snapshot for `task_update` events.
    pub fn task(&self) -> Option<&GenerationTask> {
        match &self.payload {
            EventPayload::TaskUpdate(task) => Some(task),
            _ => None,
        }
    }
}

#[derive(Default)]
struct SessionChannel {
    next_seq: u64,
    senders: Vec<mpsc::UnboundedSender<SessionEvent>>,
}

/// Routes events to the subscribers of each session.
#[derive(Default)]
pub struct NotificationHub {
    channels: DashMap<SessionId, SessionChannel>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn open(&self, session_id: &SessionId) {
        self.channels.entry(session_id.clone()).or_default();
    }

    /// Drops the session's channel. Open subscriptions end after draining
    /// what was already delivered to them.
    pub(crate) fn close_session(&self, session_id: &SessionId) {
        self.channels.remove(session_id);
    }

    /// Registers a new subscriber. Only events published after this call are
    /// delivered; there is no replay.
    pub(crate) fn subscribe(&self, session_id: &SessionId) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels
            .entry(session_id.clone())
            .or_default()
            .senders
            .push(tx);
        Subscription {
            session_id: session_id.clone(),
            rx,
        }
    }

    /// Publishes one event to every live subscriber of the session and
    /// returns its sequence number. Closed subscribers are pruned.
    pub(crate) fn publish(&self, session_id: &SessionId, payload: EventPayload) -> Option<u64> {
        let mut channel = self.channels.get_mut(session_id)?;
        let seq = channel.next_seq;
        channel.next_seq += 1;
        let event = SessionEvent {
            session_id: session_id.clone(),
            seq,
            payload,
        };
        channel.senders.retain(|tx| tx.send(event.clone()).is_ok());
        debug!(session_id = %session_id, seq, subscribers = channel.senders.len(), "published session event");
        Some(seq)
    }

    pub fn subscriber_count(&self, session_id: &SessionId) -> usize {
        self.channels
            .get(session_id)
            .map(|channel| channel.senders.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

/// Lazy, unbounded stream of events for one session.
pub struct Subscription {
    session_id: SessionId,
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Subscription {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Waits for the next event. Returns `None` once the subscription is
    /// closed or the session is gone.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }

    /// Returns an already delivered event without waiting.
    pub fn try_next_event(&mut self) -> Option<SessionEvent> {
        self.rx.try_recv().ok()
    }

    /// Stops delivery and discards anything still buffered.
    pub fn close(&mut self) {
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }
}

impl Stream for Subscription {
    type Item = SessionEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}
