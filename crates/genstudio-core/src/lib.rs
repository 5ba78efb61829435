//! Session and task tracking for image generation.
//!
//! A [`Tracker`] owns a [`SessionStore`] (history, settings and queued tasks
//! per session), a [`Dispatcher`] that drives each task through one call to a
//! [`GenerationProvider`], and a notification hub that streams task updates to
//! subscribers.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use genstudio_core::prelude::*;
//!
//! struct Echo;
//!
//! #[async_trait::async_trait]
//! impl GenerationProvider for Echo {
//!     fn id(&self) -> ProviderId {
//!         ProviderId::new("echo")
//!     }
//!
//!     async fn generate(&self, req: GenerationRequest) -> Result<ProviderImage, ProviderError> {
//!         Ok(ProviderImage::url(format!("memory://{}", req.task_id)))
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), TrackerError> {
//! let tracker = Tracker::builder().provider(Arc::new(Echo)).build()?;
//! let session = tracker.create_session()?;
//! let mut updates = tracker.subscribe(&session.id)?;
//! tracker
//!     .submit(&session.id, "sunset", ImageGenerationParams::default())
//!     .await?;
//! while let Some(event) = updates.next_event().await {
//!     if event.task().is_some_and(|task| task.status().is_terminal()) {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod ids;
pub mod image;
pub mod notify;
pub mod observability;
pub mod params;
pub mod persistence;
pub mod prelude;
pub mod provider;
pub mod session;
pub mod store;
pub mod task;
pub mod tracker;

pub use config::TrackerConfig;
pub use dispatcher::Dispatcher;
pub use errors::{ErrorDescriptor, ProviderError, TrackerError};
pub use ids::{IdGenerator, ImageId, ProviderId, SessionId, TaskId};
pub use image::{GeneratedImage, ImageRef, ImageStatus};
pub use notify::{EventPayload, NotificationHub, SessionEvent, Subscription, WebSocketMessage};
pub use observability::{ObservabilityOptions, init_observability, init_observability_with};
pub use params::{ImageGenerationParams, Quality};
pub use persistence::{InMemorySessionRepository, JsonFileSessionRepository, SessionRepository};
pub use provider::{GenerationProvider, GenerationRequest, ProviderImage};
pub use session::{SessionData, SessionSnapshot};
pub use store::{Resolution, SessionStore};
pub use task::{GenerationTask, TaskOutcome, TaskStatus};
pub use tracker::{Tracker, TrackerBuilder};
