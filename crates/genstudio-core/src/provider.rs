use crate::errors::ProviderError;
use crate::ids::{ImageId, ProviderId, SessionId, TaskId};
use crate::image::ImageRef;
use crate::params::ImageGenerationParams;

/// Request handed to a provider for one task.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationRequest {
    pub task_id: TaskId,
    pub session_id: SessionId,
    pub prompt: String,
    /// Parameter snapshot taken when the task was submitted.
    pub params: ImageGenerationParams,
}

/// What a provider returns for a successful generation.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderImage {
    /// Provider-assigned id; the dispatcher mints one when absent.
    pub id: Option<ImageId>,
    pub reference: ImageRef,
}

impl ProviderImage {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            id: None,
            reference: ImageRef::Url(url.into()),
        }
    }

    pub fn with_id(mut self, id: impl Into<ImageId>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Contract implemented by image generation backends.
///
/// Vendor bindings (auth, region and model selection, response quirks) live
/// entirely behind this trait.
#[async_trait::async_trait]
pub trait GenerationProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Cheap reachability check run before a task moves to `processing`.
    /// A failure here fails the task straight from `queued`.
    async fn ready(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Generates one image. Called exactly once per task.
    async fn generate(&self, request: GenerationRequest) -> Result<ProviderImage, ProviderError>;
}
