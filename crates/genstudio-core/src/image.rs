use chrono::{DateTime, Utc};

use crate::ids::ImageId;
use crate::params::ImageGenerationParams;

/// Where the generated bytes live.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ImageRef {
    Url(String),
    /// Opaque handle understood by the provider or a blob store.
    Handle(String),
}

impl ImageRef {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Url(value) | Self::Handle(value) => value,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_str().trim().is_empty()
    }
}

/// Terminal status of a generated image record.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageStatus {
    Completed,
    Failed,
}

/// An immutable record of one generation result.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedImage {
    pub id: ImageId,
    pub prompt: String,
    pub image: ImageRef,
    pub params: ImageGenerationParams,
    pub created_at: DateTime<Utc>,
    pub status: ImageStatus,
}
