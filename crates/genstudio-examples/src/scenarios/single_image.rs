use std::time::Duration;

use genstudio_core::prelude::*;

use super::{build_tracker, print_until_finished};

/// Submits one prompt and prints the resulting history.
pub async fn run_single_image(config: TrackerConfig, latency: Duration) -> Result<(), TrackerError> {
    let tracker = build_tracker(config, latency)?;
    let session = tracker.create_session()?;
    let mut updates = tracker.subscribe(&session.id)?;

    tracker
        .submit(&session.id, "sunset over the harbour", ImageGenerationParams::default())
        .await?;
    print_until_finished(&mut updates, 1).await;

    let data = tracker.session(&session.id).await?;
    for image in &data.history {
        println!("{} -> {}", image.prompt, image.image.as_str());
    }
    Ok(())
}
