use std::time::Duration;

use genstudio_core::prelude::*;

/// Stand-in provider: sleeps for a fixed latency and returns a fake URL.
/// Prompts containing `fail` are refused.
pub struct SimulatedProvider {
    latency: Duration,
}

impl SimulatedProvider {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait::async_trait]
impl GenerationProvider for SimulatedProvider {
    fn id(&self) -> ProviderId {
        ProviderId::new("simulated")
    }

    async fn generate(&self, req: GenerationRequest) -> Result<ProviderImage, ProviderError> {
        tokio::time::sleep(self.latency).await;
        if req.prompt.contains("fail") {
            return Err(ProviderError::provider(
                self.id(),
                format!("refused prompt {:?}", req.prompt),
                Some(422),
            ));
        }
        Ok(ProviderImage::url(format!(
            "https://images.invalid/{}/{}.png",
            req.session_id, req.task_id
        )))
    }
}
