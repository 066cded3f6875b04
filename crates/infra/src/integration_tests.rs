//! Cross-component scenarios for the generation pipeline.
//!
//! Tests: Intake -> JobStore -> Worker / CallbackReceiver -> Ledger + ResultSink -> EventBus
//!
//! Verifies:
//! - A failed reservation is refunded exactly once, whoever finalizes
//! - A callback that beats the worker's poll wins and the worker writes nothing
//! - Concurrent reservations never overdraw an account

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::{Value, json};

    use songforge_core::UserId;
    use songforge_credits::{CreditAccount, CreditTier};
    use songforge_events::{EventBus, InMemoryEventBus, StatusEvent, StreamStatus, subscribe_channel};
    use songforge_providers::{
        Artifact, CompletionMode, PollPolicy, PollStatus, RecordingSleeper, ScriptedProvider, Sleeper,
    };

    use crate::callback::{CallbackOutcome, CallbackReceiver};
    use crate::intake::{GenerationError, Intake, IntakeConfig, SongRequest};
    use crate::jobs::JobStatus;
    use crate::ledger::InMemoryCreditLedger;
    use crate::pipeline::{Providers, Stores};
    use crate::worker::{ProcessOutcome, Worker, WorkerConfig};

    const CALLBACK_URL: &str = "https://songs.example/callbacks/provider";

    struct Pipeline {
        stores: Stores,
        bus: Arc<InMemoryEventBus<StatusEvent>>,
        music: Arc<ScriptedProvider>,
        intake: Intake,
        receiver: CallbackReceiver,
        user: UserId,
    }

    impl Pipeline {
        fn new(music: ScriptedProvider, credits: u32) -> Self {
            let user = UserId::new();
            let mut stores = Stores::in_memory(CreditTier::Metered);
            stores.ledger = Arc::new(
                InMemoryCreditLedger::new(CreditTier::Metered)
                    .with_account(CreditAccount::metered(user, credits, Utc::now())),
            );
            let bus: Arc<InMemoryEventBus<StatusEvent>> = Arc::new(InMemoryEventBus::new());
            let music = Arc::new(music);
            let providers = Providers::new(music.clone(), music.clone()).with_packaging(music.clone());
            let intake = Intake::new(
                stores.clone(),
                providers,
                bus.clone(),
                IntakeConfig {
                    submit_on_enqueue: true,
                    callback_url: Some(CALLBACK_URL.into()),
                },
            );
            let receiver = CallbackReceiver::new(stores.clone(), bus.clone());
            Self {
                stores,
                bus,
                music,
                intake,
                receiver,
                user,
            }
        }

        fn worker(&self, sleeper: Arc<dyn Sleeper>) -> Worker {
            let providers = Providers::new(self.music.clone(), self.music.clone()).with_packaging(self.music.clone());
            let config = WorkerConfig::default()
                .with_poll(PollPolicy::fixed(5, Duration::from_secs(3)))
                .with_packaging_poll(PollPolicy::fixed(2, Duration::from_secs(3)))
                .with_callback_url(Some(CALLBACK_URL.into()));
            Worker::new(self.stores.clone(), providers, self.bus.clone(), config).with_sleeper(sleeper)
        }

        async fn credits(&self) -> u32 {
            self.stores.ledger.account(self.user).await.unwrap().credits_remaining
        }
    }

    fn song(prompt: &str) -> SongRequest {
        SongRequest {
            prompt: prompt.into(),
            ..SongRequest::default()
        }
    }

    fn callback_body(task_id: &str, audio_url: &str) -> Value {
        json!({
            "code": 200,
            "msg": "All generated successfully.",
            "data": {
                "callbackType": "complete",
                "task_id": task_id,
                "data": [{"id": "clip-1", "audio_url": audio_url, "duration": 28.2}]
            }
        })
    }

    /// Delivers one provider callback the first time the worker sleeps.
    struct CallbackOnFirstSleep {
        receiver: CallbackReceiver,
        body: Value,
        fired: AtomicBool,
    }

    #[async_trait]
    impl Sleeper for CallbackOnFirstSleep {
        async fn sleep(&self, _duration: Duration) {
            if !self.fired.swap(true, Ordering::SeqCst) {
                self.receiver.handle(self.body.clone()).await.unwrap();
            }
        }
    }

    #[tokio::test]
    async fn poll_timeout_refunds_and_late_callback_is_noop() {
        let p = Pipeline::new(ScriptedProvider::new().with_mode(CompletionMode::Callback), 1);

        let accepted = p.intake.enqueue_song(p.user, song("a song about rain")).await.unwrap();
        assert_eq!(p.credits().await, 0);

        let sleeper = Arc::new(RecordingSleeper::new());
        let worker = p.worker(sleeper.clone());
        assert_eq!(worker.run_once().await.unwrap(), Some(ProcessOutcome::Failed));
        assert_eq!(sleeper.calls().len(), 5);
        assert_eq!(p.credits().await, 1);

        let cid = accepted.correlation_id.clone().unwrap();
        let late = p.receiver.handle(callback_body(&cid, "https://cdn/late.mp3")).await.unwrap();
        assert_eq!(late, CallbackOutcome::AlreadyFinal { correlation_id: cid });

        let job = p.stores.jobs.get(accepted.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        let record = p.stores.results.get(accepted.result_id).await.unwrap().unwrap();
        assert_eq!(record.preview_url, None);
        assert_eq!(p.credits().await, 1);
    }

    #[tokio::test]
    async fn callback_before_poll_wins_and_worker_writes_nothing() {
        let p = Pipeline::new(
            ScriptedProvider::new()
                .with_mode(CompletionMode::Callback)
                .with_correlation_id("abc123")
                .always(PollStatus::Complete(Artifact::audio("https://cdn/poll.mp3"))),
            1,
        );
        let accepted = p.intake.enqueue_song(p.user, song("a song about rain")).await.unwrap();
        assert_eq!(accepted.correlation_id.as_deref(), Some("abc123"));

        let (_sub, mut rx) = subscribe_channel(p.bus.as_ref(), "abc123");
        let sleeper = Arc::new(CallbackOnFirstSleep {
            receiver: p.receiver.clone(),
            body: callback_body("abc123", "https://cdn/callback.mp3"),
            fired: AtomicBool::new(false),
        });
        let worker = p.worker(sleeper);

        assert_eq!(worker.run_once().await.unwrap(), Some(ProcessOutcome::Superseded));
        assert_eq!(p.music.poll_calls(), 0);

        let job = p.stores.jobs.get(accepted.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.result.as_deref(), Some("https://cdn/callback.mp3"));
        let record = p.stores.results.get(accepted.result_id).await.unwrap().unwrap();
        assert_eq!(record.preview_url.as_deref(), Some("https://cdn/callback.mp3"));
        assert_eq!(record.duration_secs, Some(28));
        assert_eq!(p.credits().await, 0);

        let mut statuses = Vec::new();
        while let Ok(event) = rx.try_recv() {
            statuses.push(event.status);
        }
        assert_eq!(statuses, vec![StreamStatus::Submitted, StreamStatus::Complete]);
        assert_eq!(worker.stats().snapshot().jobs_superseded, 1);
    }

    #[tokio::test]
    async fn callback_on_pending_job_leaves_nothing_to_claim() {
        let p = Pipeline::new(
            ScriptedProvider::new()
                .with_mode(CompletionMode::Callback)
                .with_correlation_id("abc123"),
            1,
        );
        let accepted = p.intake.enqueue_song(p.user, song("a song about rain")).await.unwrap();

        let out = p.receiver.handle(callback_body("abc123", "https://cdn/cb.mp3")).await.unwrap();
        assert!(matches!(out, CallbackOutcome::Finalized { .. }));

        let worker = p.worker(Arc::new(RecordingSleeper::new()));
        assert_eq!(worker.run_once().await.unwrap(), None);
        assert_eq!(p.music.poll_calls(), 0);
        assert_eq!(
            p.stores.jobs.get(accepted.job_id).await.unwrap().unwrap().status,
            JobStatus::Succeeded
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_intake_never_overdraws() {
        let p = Arc::new(Pipeline::new(
            ScriptedProvider::new().with_immediate(Artifact::audio("https://cdn/a.mp3")),
            1,
        ));

        let mut handles = Vec::new();
        for i in 0..10 {
            let p = p.clone();
            handles.push(tokio::spawn(async move {
                p.intake.enqueue_song(p.user, song(&format!("song number {i}"))).await
            }));
        }
        let mut accepted = 0;
        let mut refused = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(GenerationError::InsufficientCredits) => refused += 1,
                Err(other) => panic!("unexpected error {other:?}"),
            }
        }
        assert_eq!((accepted, refused), (1, 9));
        assert_eq!(p.credits().await, 0);
        assert_eq!(p.stores.jobs.stats().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn failure_paths_refund_exactly_once() {
        let p = Pipeline::new(
            ScriptedProvider::new()
                .with_mode(CompletionMode::Callback)
                .always(PollStatus::Error("generate_audio_failed".into())),
            1,
        );
        let accepted = p.intake.enqueue_song(p.user, song("a song about rain")).await.unwrap();
        let cid = accepted.correlation_id.clone().unwrap();

        // Provider error callback: broadcast only.
        let out = p
            .receiver
            .handle(json!({"code": 501, "msg": "failed", "data": {"task_id": cid, "callbackType": "error"}}))
            .await
            .unwrap();
        assert!(matches!(out, CallbackOutcome::ProviderError { .. }));
        assert_eq!(p.credits().await, 0);

        let a = p.worker(Arc::new(RecordingSleeper::new()));
        let b = p.worker(Arc::new(RecordingSleeper::new()));
        assert_eq!(a.run_once().await.unwrap(), Some(ProcessOutcome::Failed));
        assert_eq!(b.run_once().await.unwrap(), None);
        assert_eq!(p.credits().await, 1);

        assert!(!p.stores.jobs.mark_failed(accepted.job_id, "again").await.unwrap());
        assert!(!p.stores.jobs.mark_succeeded(accepted.job_id, "https://cdn/x.mp3").await.unwrap());
        let job = p.stores.jobs.get(accepted.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(p.credits().await, 1);
    }

    #[tokio::test]
    async fn packaging_timeout_still_succeeds_with_audio() {
        let p = Pipeline::new(
            ScriptedProvider::new().with_immediate(Artifact::audio("https://cdn/a.mp3").with_id("clip-1")),
            1,
        );
        let accepted = p
            .intake
            .enqueue_song(
                p.user,
                SongRequest {
                    prompt: "a song about rain".into(),
                    package_video: true,
                    ..SongRequest::default()
                },
            )
            .await
            .unwrap();

        let worker = p.worker(Arc::new(RecordingSleeper::new()));
        assert_eq!(worker.run_once().await.unwrap(), Some(ProcessOutcome::Succeeded));
        assert_eq!(p.music.packaging_calls(), 1);

        let job = p.stores.jobs.get(accepted.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.result.as_deref(), Some("https://cdn/a.mp3"));
        assert_eq!(p.credits().await, 0);
    }

    #[tokio::test]
    async fn early_subscriber_sees_unmatched_callback_and_releases_on_drop() {
        let p = Pipeline::new(ScriptedProvider::new(), 0);

        let (sub, mut rx) = subscribe_channel(p.bus.as_ref(), "not-yet-stored");
        assert_eq!(p.bus.subscriber_count("not-yet-stored"), 1);

        let out = p
            .receiver
            .handle(callback_body("not-yet-stored", "https://cdn/early.mp3"))
            .await
            .unwrap();
        assert!(matches!(out, CallbackOutcome::NotFound { .. }));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.status, StreamStatus::Complete);
        assert_eq!(event.audio_url.as_deref(), Some("https://cdn/early.mp3"));

        drop(sub);
        assert_eq!(p.bus.subscriber_count("not-yet-stored"), 0);
        assert_eq!(p.bus.publish("not-yet-stored", StatusEvent::complete("not-yet-stored")), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn two_workers_process_each_job_once() {
        let p = Pipeline::new(
            ScriptedProvider::new().with_immediate(Artifact::audio("https://cdn/a.mp3")),
            0,
        );
        p.stores.ledger.grant(p.user, 6).await.unwrap();
        for i in 0..6 {
            p.intake.enqueue_song(p.user, song(&format!("song number {i}"))).await.unwrap();
        }

        let a = p.worker(Arc::new(RecordingSleeper::new())).spawn();
        let b = p.worker(Arc::new(RecordingSleeper::new())).spawn();
        for _ in 0..2000 {
            if p.stores.jobs.stats().await.unwrap().succeeded == 6 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let (sa, sb) = (a.stats(), b.stats());
        a.shutdown().await;
        b.shutdown().await;

        assert_eq!(sa.jobs_claimed + sb.jobs_claimed, 6);
        assert_eq!(sa.jobs_succeeded + sb.jobs_succeeded, 6);
        assert_eq!(p.stores.jobs.stats().await.unwrap().succeeded, 6);
    }
}
