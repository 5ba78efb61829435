use std::time::Duration;

use genstudio_core::prelude::*;

use super::{build_tracker, print_until_finished};

/// Submits a handful of prompts at once, one of which the provider refuses.
pub async fn run_concurrent(config: TrackerConfig, latency: Duration) -> Result<(), TrackerError> {
    let tracker = build_tracker(config, latency)?;
    let session = tracker.create_session()?;
    let mut updates = tracker.subscribe(&session.id)?;
    let params = ImageGenerationParams::default()
        .aspect_ratio("16:9")
        .quality(Quality::Draft);
    tracker.update_settings(&session.id, params).await?;

    let prompts = ["fox in snow", "please fail", "lighthouse", "paper boat"];
    for prompt in prompts {
        tracker
            .submit_with_current_settings(&session.id, prompt)
            .await?;
    }
    print_until_finished(&mut updates, prompts.len()).await;

    let data = tracker.session(&session.id).await?;
    println!(
        "history={} queued={}",
        data.history.len(),
        data.queued_tasks.len()
    );
    Ok(())
}
