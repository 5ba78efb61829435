use std::time::Duration;

use genstudio_core::prelude::*;

use super::{build_tracker, print_until_finished};

/// Uses a timeout shorter than the provider latency so the task fails.
pub async fn run_timeout(config: TrackerConfig, latency: Duration) -> Result<(), TrackerError> {
    let tracker = build_tracker(config, latency)?;
    let session = tracker.create_session()?;
    let mut updates = tracker.subscribe(&session.id)?;

    let task_id = tracker
        .submit_with_timeout(
            &session.id,
            "a very slow cathedral",
            ImageGenerationParams::default(),
            latency / 3 + Duration::from_millis(1),
        )
        .await?;
    print_until_finished(&mut updates, 1).await;

    let task = tracker.task(&session.id, &task_id).await?;
    println!("status={:?} error={:?}", task.status(), task.error());
    Ok(())
}
