use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use genstudio_core::prelude::*;
use genstudio_core::{ImageId, InMemorySessionRepository, JsonFileSessionRepository, TaskOutcome};

/// Provider whose behaviour is chosen per prompt.
struct ScriptedProvider {
    calls: AtomicUsize,
    delays: HashMap<String, Duration>,
    fixed_image_id: Option<String>,
}

impl ScriptedProvider {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delays: HashMap::new(),
            fixed_image_id: None,
        }
    }

    fn delay(mut self, prompt: &str, delay: Duration) -> Self {
        self.delays.insert(prompt.to_string(), delay);
        self
    }

    fn fixed_image_id(mut self, id: &str) -> Self {
        self.fixed_image_id = Some(id.to_string());
        self
    }
}

#[async_trait::async_trait]
impl GenerationProvider for ScriptedProvider {
    fn id(&self) -> ProviderId {
        ProviderId::new("scripted")
    }

    async fn generate(&self, req: GenerationRequest) -> Result<ProviderImage, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(&req.prompt) {
            tokio::time::sleep(*delay).await;
        }
        if req.prompt == "refuse" {
            return Err(ProviderError::provider("scripted", "prompt refused", Some(400)));
        }
        let image = ProviderImage::url(format!("https://img.invalid/{}.png", req.task_id));
        Ok(match &self.fixed_image_id {
            Some(id) => image.with_id(id.as_str()),
            None => image,
        })
    }
}

fn tracker(provider: ScriptedProvider) -> (Tracker, Arc<ScriptedProvider>) {
    let provider = Arc::new(provider);
    let tracker = Tracker::builder()
        .provider(provider.clone())
        .config(TrackerConfig::default().default_timeout(Duration::from_secs(5)))
        .build()
        .expect("tracker");
    (tracker, provider)
}

/// Collects task-update statuses per task until `done` tasks reached a terminal state.
async fn collect_until_terminal(
    sub: &mut Subscription,
    done: usize,
) -> HashMap<TaskId, Vec<TaskStatus>> {
    let mut seen: HashMap<TaskId, Vec<TaskStatus>> = HashMap::new();
    let mut terminal = 0;
    while terminal < done {
        let event = tokio::time::timeout(Duration::from_secs(5), sub.next_event())
            .await
            .expect("event before timeout")
            .expect("subscription open");
        if let Some(task) = event.task() {
            seen.entry(task.id.clone()).or_default().push(task.status());
            if task.status().is_terminal() {
                terminal += 1;
            }
        }
    }
    seen
}

#[tokio::test]
async fn sunset_task_completes_into_history() {
    let (tracker, provider) = tracker(ScriptedProvider::new());
    let session = tracker.create_session().unwrap();
    let mut sub = tracker.subscribe(&session.id).unwrap();

    let t1 = tracker
        .submit(&session.id, "sunset", ImageGenerationParams::default())
        .await
        .unwrap();
    let statuses = collect_until_terminal(&mut sub, 1).await;
    assert_eq!(
        statuses[&t1],
        vec![TaskStatus::Queued, TaskStatus::Processing, TaskStatus::Completed]
    );

    let data = tracker.session(&session.id).await.unwrap();
    assert_eq!(data.history.len(), 1);
    assert_eq!(data.history[0].prompt, "sunset");
    assert!(data.queued_tasks.is_empty());

    let task = tracker.task(&session.id, &t1).await.unwrap();
    assert_eq!(task.status(), TaskStatus::Completed);
    assert!(task.result().is_some() && task.error().is_none());
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn timed_out_task_fails_and_late_response_is_ignored() {
    let (tracker, _) = tracker(ScriptedProvider::new().delay("slow", Duration::from_millis(300)));
    let session = tracker.create_session().unwrap();
    let mut sub = tracker.subscribe(&session.id).unwrap();

    let t2 = tracker
        .submit_with_timeout(
            &session.id,
            "slow",
            ImageGenerationParams::default(),
            Duration::from_millis(40),
        )
        .await
        .unwrap();
    let statuses = collect_until_terminal(&mut sub, 1).await;
    assert_eq!(
        statuses[&t2],
        vec![TaskStatus::Queued, TaskStatus::Processing, TaskStatus::Failed]
    );

    let failed = tracker.task(&session.id, &t2).await.unwrap();
    assert!(!failed.error().unwrap_or_default().is_empty());
    assert!(failed.result().is_none());

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(tracker.task(&session.id, &t2).await.unwrap(), failed);
    assert!(tracker.session(&session.id).await.unwrap().history.is_empty());
    assert!(sub.try_next_event().is_none());
}

#[tokio::test]
async fn concurrent_tasks_land_in_completion_order() {
    let (tracker, _) = tracker(
        ScriptedProvider::new()
            .delay("first-submitted", Duration::from_millis(120))
            .delay("second-submitted", Duration::from_millis(10)),
    );
    let session = tracker.create_session().unwrap();
    let mut sub = tracker.subscribe(&session.id).unwrap();

    let (t3, t4) = tokio::join!(
        tracker.submit(&session.id, "first-submitted", ImageGenerationParams::default()),
        tracker.submit(&session.id, "second-submitted", ImageGenerationParams::default()),
    );
    let (t3, t4) = (t3.unwrap(), t4.unwrap());
    collect_until_terminal(&mut sub, 2).await;

    let data = tracker.session(&session.id).await.unwrap();
    assert!(data.queued_tasks.is_empty());
    let prompts: Vec<&str> = data.history.iter().map(|img| img.prompt.as_str()).collect();
    assert_eq!(prompts, vec!["second-submitted", "first-submitted"]);
    for id in [&t3, &t4] {
        assert_eq!(
            tracker.task(&session.id, id).await.unwrap().status(),
            TaskStatus::Completed
        );
    }
}

#[tokio::test]
async fn unknown_session_submit_registers_nothing() {
    let (tracker, provider) = tracker(ScriptedProvider::new());
    let missing = SessionId::new("missing");
    let err = tracker
        .submit(&missing, "sunset", ImageGenerationParams::default())
        .await;
    assert!(matches!(err, Err(TrackerError::SessionNotFound { .. })));
    assert_eq!(tracker.store().session_count(), 0);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn colliding_provider_image_ids_never_duplicate_history() {
    let (tracker, _) = tracker(ScriptedProvider::new().fixed_image_id("img-same"));
    let session = tracker.create_session().unwrap();
    let mut sub = tracker.subscribe(&session.id).unwrap();

    for n in 0..4 {
        tracker
            .submit(&session.id, format!("prompt {n}"), ImageGenerationParams::default())
            .await
            .unwrap();
    }
    let statuses = collect_until_terminal(&mut sub, 4).await;
    assert!(statuses
        .values()
        .all(|seq| seq.last() == Some(&TaskStatus::Completed)));

    let data = tracker.session(&session.id).await.unwrap();
    assert_eq!(data.history.len(), 1);
    assert_eq!(data.history[0].id, ImageId::new("img-same"));
    assert!(data.queued_tasks.is_empty());
}

#[tokio::test]
async fn every_observed_status_sequence_is_a_permitted_path() {
    let (tracker, _) = tracker(ScriptedProvider::new());
    let session = tracker.create_session().unwrap();
    let mut sub = tracker.subscribe(&session.id).unwrap();

    for prompt in ["a", "refuse", "b", "refuse", "c"] {
        tracker
            .submit(&session.id, prompt, ImageGenerationParams::default())
            .await
            .unwrap();
    }
    let statuses = collect_until_terminal(&mut sub, 5).await;

    let permitted = [
        vec![TaskStatus::Queued, TaskStatus::Processing, TaskStatus::Completed],
        vec![TaskStatus::Queued, TaskStatus::Processing, TaskStatus::Failed],
        vec![TaskStatus::Queued, TaskStatus::Failed],
    ];
    for (task_id, seq) in &statuses {
        assert!(permitted.contains(seq), "task {task_id} followed {seq:?}");
        let task = tracker.task(&session.id, task_id).await.unwrap();
        match task.status() {
            TaskStatus::Completed => assert!(task.result().is_some() && task.error().is_none()),
            TaskStatus::Failed => assert!(task.result().is_none() && task.error().is_some()),
            other => panic!("task {task_id} not terminal: {other:?}"),
        }
    }
    assert_eq!(tracker.session(&session.id).await.unwrap().history.len(), 3);
}

#[tokio::test]
async fn duplicate_resolution_through_the_store_is_idempotent() {
    let (tracker, _) = tracker(ScriptedProvider::new());
    let session = tracker.create_session().unwrap();
    let mut sub = tracker.subscribe(&session.id).unwrap();
    let task_id = tracker
        .submit(&session.id, "sunset", ImageGenerationParams::default())
        .await
        .unwrap();
    collect_until_terminal(&mut sub, 1).await;

    let completed = tracker.task(&session.id, &task_id).await.unwrap();
    let image = completed.result().cloned().expect("result");
    let again = tracker
        .store()
        .resolve_task(&session.id, &task_id, TaskOutcome::Completed(image))
        .await
        .unwrap();
    assert_eq!(again.task(), &completed);
    assert_eq!(tracker.session(&session.id).await.unwrap().history.len(), 1);
    assert!(sub.try_next_event().is_none());
}

#[tokio::test]
async fn queued_task_can_be_cancelled_before_dispatch() {
    let provider = Arc::new(ScriptedProvider::new().delay("hog", Duration::from_millis(200)));
    let tracker = Tracker::builder()
        .provider(provider.clone())
        .config(TrackerConfig::default().max_concurrent_dispatches(1))
        .build()
        .unwrap();
    let session = tracker.create_session().unwrap();
    let mut sub = tracker.subscribe(&session.id).unwrap();

    let hog = tracker
        .submit(&session.id, "hog", ImageGenerationParams::default())
        .await
        .unwrap();
    // Make sure the hog holds the only dispatch slot before queueing another task.
    loop {
        let event = sub.next_event().await.expect("event");
        if event
            .task()
            .is_some_and(|t| t.id == hog && t.status() == TaskStatus::Processing)
        {
            break;
        }
    }
    let waiting = tracker
        .submit(&session.id, "waiting", ImageGenerationParams::default())
        .await
        .unwrap();

    let cancelled = tracker.cancel(&session.id, &waiting).await.unwrap();
    assert_eq!(cancelled.status(), TaskStatus::Failed);

    let statuses = collect_until_terminal(&mut sub, 2).await;
    assert_eq!(statuses[&waiting], vec![TaskStatus::Queued, TaskStatus::Failed]);
    assert_eq!(statuses[&hog].last(), Some(&TaskStatus::Completed));
    assert!(matches!(
        tracker.cancel(&session.id, &hog).await,
        Ok(task) if task.status() == TaskStatus::Completed
    ));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn submit_with_current_settings_snapshots_params() {
    let (tracker, _) = tracker(ScriptedProvider::new());
    let session = tracker.create_session().unwrap();
    let mut sub = tracker.subscribe(&session.id).unwrap();
    let settings = ImageGenerationParams::default()
        .aspect_ratio("16:9")
        .quality(Quality::High);
    tracker
        .update_settings(&session.id, settings.clone())
        .await
        .unwrap();

    let task_id = tracker
        .submit_with_current_settings(&session.id, "sunset")
        .await
        .unwrap();
    tracker
        .update_settings(&session.id, ImageGenerationParams::default())
        .await
        .unwrap();
    collect_until_terminal(&mut sub, 1).await;

    let task = tracker.task(&session.id, &task_id).await.unwrap();
    assert_eq!(task.params, settings);
    assert_eq!(task.result().unwrap().params, settings);
}

#[tokio::test]
async fn sessions_persist_and_restore_through_json_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let repo = JsonFileSessionRepository::new(dir.path());

    let (tracker, _) = tracker(ScriptedProvider::new());
    let session = tracker.create_session().unwrap();
    let mut sub = tracker.subscribe(&session.id).unwrap();
    tracker
        .submit(&session.id, "sunset", ImageGenerationParams::default())
        .await
        .unwrap();
    collect_until_terminal(&mut sub, 1).await;
    tracker.persist_session(&session.id, &repo).await.unwrap();
    let before = tracker.remove_session(&session.id).await.unwrap();
    assert!(sub.next_event().await.is_none());

    let restored = tracker.restore_session(&session.id, &repo).await.unwrap();
    assert_eq!(restored.history, before.history);
    assert!(restored.last_accessed >= restored.created_at);

    let missing = tracker
        .restore_session(&SessionId::new("never-saved"), &InMemorySessionRepository::new())
        .await;
    assert!(matches!(missing, Err(TrackerError::SessionNotFound { .. })));
}

#[tokio::test]
async fn restoring_subscriber_sees_the_restored_event_first() {
    let repo = InMemorySessionRepository::new();
    let (source, _) = tracker(ScriptedProvider::new());
    let session = source.create_session().unwrap();
    let mut sub = source.subscribe(&session.id).unwrap();
    source
        .submit(&session.id, "sunset", ImageGenerationParams::default())
        .await
        .unwrap();
    collect_until_terminal(&mut sub, 1).await;
    source.persist_session(&session.id, &repo).await.unwrap();

    let (target, _) = tracker(ScriptedProvider::new());
    let (restored, mut updates) = target
        .restore_session_and_subscribe(&session.id, &repo)
        .await
        .unwrap();
    assert_eq!(restored.history.len(), 1);

    let event = updates.try_next_event().expect("restored event buffered");
    match event.payload {
        EventPayload::SessionRestored(data) => assert_eq!(data.id, session.id),
        other => panic!("unexpected payload {other:?}"),
    }

    target
        .submit(&session.id, "harbour", ImageGenerationParams::default())
        .await
        .unwrap();
    let statuses = collect_until_terminal(&mut updates, 1).await;
    assert_eq!(
        statuses.into_values().next(),
        Some(vec![TaskStatus::Queued, TaskStatus::Processing, TaskStatus::Completed])
    );
}

#[tokio::test]
async fn error_events_reach_subscribers() {
    let (tracker, _) = tracker(ScriptedProvider::new());
    let session = tracker.create_session().unwrap();
    let mut sub = tracker.subscribe(&session.id).unwrap();

    let seq = tracker
        .publish_error(
            &session.id,
            &TrackerError::Validation("width must be greater than 0".into()),
        )
        .unwrap();
    let event = sub.next_event().await.unwrap();
    assert_eq!(event.seq, seq);
    match event.payload {
        EventPayload::Error(descriptor) => assert_eq!(descriptor.kind, "validation"),
        other => panic!("unexpected payload {other:?}"),
    }
}
