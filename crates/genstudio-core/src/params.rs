use crate::errors::TrackerError;

/// Rendering quality requested from the provider.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Draft,
    #[default]
    Standard,
    High,
}

/// Generation parameters. A value object compared by value; every field is
/// optional so that providers can apply their own defaults.
#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageGenerationParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Aspect ratio token such as `16:9`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default)]
    pub quality: Quality,
}

impl ImageGenerationParams {
    pub fn width(mut self, width: u32) -> Self {
        self.width = Some(width);
        self
    }

    pub fn height(mut self, height: u32) -> Self {
        self.height = Some(height);
        self
    }

    pub fn aspect_ratio(mut self, ratio: impl Into<String>) -> Self {
        self.aspect_ratio = Some(ratio.into());
        self
    }

    pub fn style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }

    pub fn quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    /// Rejects non-positive dimensions, malformed aspect ratios and blank
    /// style tokens.
    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.width == Some(0) {
            return Err(TrackerError::Validation(
                "width must be greater than 0".into(),
            ));
        }
        if self.height == Some(0) {
            return Err(TrackerError::Validation(
                "height must be greater than 0".into(),
            ));
        }
        if let Some(ratio) = &self.aspect_ratio
            && !is_valid_ratio(ratio)
        {
            return Err(TrackerError::Validation(format!(
                "aspect ratio must look like W:H, got {ratio:?}"
            )));
        }
        if let Some(style) = &self.style
            && style.trim().is_empty()
        {
            return Err(TrackerError::Validation(
                "style must not be blank".into(),
            ));
        }
        Ok(())
    }
}

fn is_valid_ratio(ratio: &str) -> bool {
    let Some((w, h)) = ratio.trim().split_once(':') else {
        return false;
    };
    matches!(
        (w.parse::<u32>(), h.parse::<u32>()),
        (Ok(w), Ok(h)) if w > 0 && h > 0
    )
}
