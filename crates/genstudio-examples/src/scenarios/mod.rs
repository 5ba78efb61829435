mod concurrent;
mod persisted;
mod single_image;
mod timeout;

pub use concurrent::run_concurrent;
pub use persisted::run_persisted;
pub use single_image::run_single_image;
pub use timeout::run_timeout;

use std::sync::Arc;
use std::time::Duration;

use genstudio_core::prelude::*;

use crate::simulated::SimulatedProvider;

pub(crate) fn build_tracker(config: TrackerConfig, latency: Duration) -> Result<Tracker, TrackerError> {
    Tracker::builder()
        .provider(Arc::new(SimulatedProvider::new(latency)))
        .config(config)
        .build()
}

/// Prints task updates until `count` tasks have finished.
pub(crate) async fn print_until_finished(updates: &mut Subscription, count: usize) {
    let mut finished = 0;
    while finished < count {
        let Some(event) = updates.next_event().await else {
            break;
        };
        match serde_json::to_string(&event) {
            Ok(line) => println!("{line}"),
            Err(err) => tracing::warn!(error = %err, "could not render event"),
        }
        if event.task().is_some_and(|task| task.status().is_terminal()) {
            finished += 1;
        }
    }
}
