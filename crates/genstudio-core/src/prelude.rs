//! Common imports for typical tracker usage.
pub use crate::{
    EventPayload, GeneratedImage, GenerationProvider, GenerationRequest, GenerationTask,
    ImageGenerationParams, ImageRef, ProviderError, ProviderId, ProviderImage, Quality,
    SessionData, SessionEvent, SessionId, Subscription, TaskId, TaskStatus, Tracker,
    TrackerConfig, TrackerError,
};
