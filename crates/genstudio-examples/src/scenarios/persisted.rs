use std::path::Path;
use std::time::Duration;

use genstudio_core::JsonFileSessionRepository;
use genstudio_core::prelude::*;

use super::{build_tracker, print_until_finished};

/// Saves a session to disk, drops it, and restores it into a new tracker.
pub async fn run_persisted(
    config: TrackerConfig,
    latency: Duration,
    dir: &Path,
) -> Result<(), TrackerError> {
    let repository = JsonFileSessionRepository::new(dir);

    let tracker = build_tracker(config.clone(), latency)?;
    let session = tracker.create_session()?;
    let mut updates = tracker.subscribe(&session.id)?;
    tracker
        .submit(&session.id, "tidal pool", ImageGenerationParams::default())
        .await?;
    print_until_finished(&mut updates, 1).await;
    tracker.persist_session(&session.id, &repository).await?;
    tracker.shutdown();

    let fresh = build_tracker(config, latency)?;
    let (restored, mut restored_updates) = fresh
        .restore_session_and_subscribe(&session.id, &repository)
        .await?;
    if let Some(event) = restored_updates.try_next_event() {
        println!("first event after restore: seq={}", event.seq);
    }
    println!(
        "restored {} with {} image(s) from {}",
        restored.id,
        restored.history.len(),
        dir.display()
    );
    Ok(())
}
