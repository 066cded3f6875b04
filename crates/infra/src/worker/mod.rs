//! Background worker: claims pending jobs and drives them to a terminal state.
//!
//! ## Per-job state machine
//!
//! `claimed -> submitted -> polling -> {succeeded | failed}`
//!
//! - A job whose payload does not decode is failed immediately.
//! - Every per-job error is converted into `mark_failed`; nothing escapes the loop.
//! - Refunds happen only after this worker won the `mark_failed` race, so a
//!   reservation is handed back at most once even when the callback receiver
//!   or a second worker finalizes the same job.
//! - When the job is finalized elsewhere while polling, the worker stops
//!   without writing anything.

mod workflows;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use songforge_core::{JobId, ResultId};
use songforge_events::{StatusEvent, StreamStatus};
use songforge_providers::{PollPolicy, ProviderError, Sleeper, TokioSleeper};

use crate::jobs::{Job, JobStoreError};
use crate::ledger::LedgerError;
use crate::pipeline::{Providers, StatusBus, Stores};
use crate::results::{ArtifactSet, ResultSinkError};

pub use workflows::{NUDGE_DEFAULT_DURATION_SECS, SONG_DEFAULT_DURATION_SECS};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Name for logging.
    pub name: String,
    /// Wait between claim attempts when the queue is empty.
    pub idle_interval: Duration,
    /// Generation polling budget.
    pub poll: PollPolicy,
    /// Packaging polling budget.
    pub packaging_poll: PollPolicy,
    /// Passed to callback-capable providers on submit.
    pub callback_url: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "generation-worker".to_string(),
            idle_interval: Duration::from_secs(3),
            poll: PollPolicy::default(),
            packaging_poll: PollPolicy::default().with_max_attempts(20),
            callback_url: None,
        }
    }
}

impl WorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_packaging_poll(mut self, poll: PollPolicy) -> Self {
        self.packaging_poll = poll;
        self
    }

    pub fn with_callback_url(mut self, url: Option<String>) -> Self {
        self.callback_url = url;
        self
    }

    pub fn with_idle_interval(mut self, interval: Duration) -> Self {
        self.idle_interval = interval;
        self
    }
}

/// Error raised inside a workflow; always ends in `mark_failed`.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("malformed job payload: {0}")]
    Payload(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Jobs(#[from] JobStoreError),

    #[error(transparent)]
    Results(#[from] ResultSinkError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// How a claimed job ended from this worker's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessOutcome {
    Succeeded,
    Failed,
    /// Another path finalized the job first; this worker wrote nothing.
    Superseded,
}

#[derive(Debug, Default)]
pub struct WorkerStats {
    claimed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    refunded: AtomicU64,
    superseded: AtomicU64,
    started: std::sync::OnceLock<Instant>,
}

/// Serializable view of [`WorkerStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStatsSnapshot {
    pub jobs_claimed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub credits_refunded: u64,
    pub jobs_superseded: u64,
    pub uptime_secs: u64,
}

impl WorkerStats {
    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            jobs_claimed: self.claimed.load(Ordering::Relaxed),
            jobs_succeeded: self.succeeded.load(Ordering::Relaxed),
            jobs_failed: self.failed.load(Ordering::Relaxed),
            credits_refunded: self.refunded.load(Ordering::Relaxed),
            jobs_superseded: self.superseded.load(Ordering::Relaxed),
            uptime_secs: self.started.get().map(|s| s.elapsed().as_secs()).unwrap_or(0),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Handle to a spawned worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    stats: Arc<WorkerStats>,
}

impl WorkerHandle {
    /// Stop after the current job and wait for the loop to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.join.await {
            warn!(error = %err, "worker task ended abnormally");
        }
    }

    pub fn stats(&self) -> WorkerStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn stats_handle(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }
}

/// Generation worker.
#[derive(Clone)]
pub struct Worker {
    stores: Stores,
    providers: Providers,
    bus: StatusBus,
    sleeper: Arc<dyn Sleeper>,
    config: WorkerConfig,
    stats: Arc<WorkerStats>,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.config.name)
            .field("providers", &self.providers)
            .finish_non_exhaustive()
    }
}

impl Worker {
    pub fn new(stores: Stores, providers: Providers, bus: StatusBus, config: WorkerConfig) -> Self {
        Self {
            stores,
            providers,
            bus,
            sleeper: Arc::new(TokioSleeper),
            config,
            stats: Arc::new(WorkerStats::default()),
        }
    }

    /// Replace the sleeper used for idling and polling.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run the claim loop on the tokio runtime until shut down.
    pub fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = self.stats.clone();
        let join = tokio::spawn(async move { self.run(shutdown_rx).await });
        WorkerHandle {
            shutdown: shutdown_tx,
            join,
            stats,
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let _ = self.stats.started.set(Instant::now());
        info!(worker = %self.config.name, "worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.run_once().await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(err) => {
                    error!(worker = %self.config.name, error = %err, "failed to claim job");
                }
            }
            tokio::select! {
                _ = self.sleeper.sleep(self.config.idle_interval) => {}
                _ = shutdown.changed() => {}
            }
        }

        info!(worker = %self.config.name, "worker stopped");
    }

    /// Claim and process at most one job. `None` when the queue was empty.
    pub async fn run_once(&self) -> Result<Option<ProcessOutcome>, JobStoreError> {
        let Some(job) = self.stores.jobs.claim_pending().await? else {
            return Ok(None);
        };
        WorkerStats::bump(&self.stats.claimed);
        debug!(worker = %self.config.name, job_id = %job.id, kind = %job.kind, "claimed job");
        Ok(Some(self.process(job).await))
    }

    /// Drive one claimed job to a terminal state.
    pub async fn process(&self, job: Job) -> ProcessOutcome {
        let outcome = match job.decode_payload() {
            Ok(payload) => match self.execute(&job, payload).await {
                Ok(workflows::Outcome::Completed { correlation_id, artifacts }) => {
                    self.succeed(&job, correlation_id.as_deref(), artifacts).await
                }
                Ok(workflows::Outcome::Superseded) => Ok(ProcessOutcome::Superseded),
                Err(err) => Err(err),
            },
            Err(err) => Err(WorkerError::Payload(err.to_string())),
        };

        match outcome {
            Ok(ProcessOutcome::Superseded) => {
                WorkerStats::bump(&self.stats.superseded);
                debug!(job_id = %job.id, "job finalized elsewhere");
                ProcessOutcome::Superseded
            }
            Ok(done) => done,
            Err(err) => self.fail(&job, &err.to_string()).await,
        }
    }

    /// Write the result record, then try to claim the success.
    async fn succeed(
        &self,
        job: &Job,
        correlation_id: Option<&str>,
        artifacts: ArtifactSet,
    ) -> Result<ProcessOutcome, WorkerError> {
        let result_id = job.result_id();
        if let Some(result_id) = result_id {
            if !self.stores.results.set_artifacts(result_id, &artifacts).await? {
                warn!(job_id = %job.id, result_id = %result_id, "result record missing; artifacts not stored");
            }
        }

        let result = artifacts
            .full_url
            .clone()
            .or_else(|| artifacts.preview_url.clone())
            .unwrap_or_default();
        if !self.stores.jobs.mark_succeeded(job.id, &result).await? {
            return Ok(ProcessOutcome::Superseded);
        }

        WorkerStats::bump(&self.stats.succeeded);
        info!(job_id = %job.id, kind = %job.kind, "job succeeded");
        if let Some(cid) = correlation_id {
            self.publish_complete(cid, job.id, result_id, &artifacts);
        }
        Ok(ProcessOutcome::Succeeded)
    }

    /// Mark failed, then refund if this call won the transition.
    async fn fail(&self, job: &Job, reason: &str) -> ProcessOutcome {
        let won = match self.stores.jobs.mark_failed(job.id, reason).await {
            Ok(won) => won,
            Err(err) => {
                error!(job_id = %job.id, error = %err, "could not mark job failed");
                return ProcessOutcome::Failed;
            }
        };
        if !won {
            WorkerStats::bump(&self.stats.superseded);
            debug!(job_id = %job.id, "failure ignored; job already final");
            return ProcessOutcome::Superseded;
        }

        WorkerStats::bump(&self.stats.failed);
        warn!(job_id = %job.id, kind = %job.kind, reason, "job failed");

        if job.reserved_credit() {
            match self.stores.ledger.refund(job.user_id, 1).await {
                Ok(()) => {
                    WorkerStats::bump(&self.stats.refunded);
                    info!(job_id = %job.id, user_id = %job.user_id, "credit refunded");
                }
                Err(err) => error!(job_id = %job.id, user_id = %job.user_id, error = %err, "refund failed"),
            }
        }

        if let Some(cid) = self.correlation_id_of(job).await {
            self.bus.publish(
                &cid,
                StatusEvent::failed(cid.clone(), reason)
                    .with_job(job.id)
                    .with_result(job.result_id()),
            );
        }
        ProcessOutcome::Failed
    }

    /// The id may have been recorded after the job was claimed.
    async fn correlation_id_of(&self, job: &Job) -> Option<String> {
        if let Some(cid) = &job.provider_correlation_id {
            return Some(cid.clone());
        }
        match self.stores.jobs.get(job.id).await {
            Ok(Some(stored)) => stored.provider_correlation_id,
            _ => None,
        }
    }

    fn publish_submitted(&self, correlation_id: &str, job: &Job) {
        self.bus.publish(
            correlation_id,
            StatusEvent::new(correlation_id, StreamStatus::Submitted)
                .with_job(job.id)
                .with_result(job.result_id()),
        );
    }

    fn publish_complete(&self, correlation_id: &str, job_id: JobId, result_id: Option<ResultId>, artifacts: &ArtifactSet) {
        self.bus.publish(
            correlation_id,
            StatusEvent::complete(correlation_id)
                .with_job(job_id)
                .with_result(result_id)
                .with_artifacts(artifacts.preview_url.clone(), artifacts.full_url.clone(), artifacts.duration_secs),
        );
    }

    /// Polling continues only while nobody else has finalized the job.
    async fn still_open(&self, job_id: JobId) -> bool {
        match self.stores.jobs.get(job_id).await {
            Ok(Some(job)) => !job.status.is_terminal(),
            Ok(None) => false,
            Err(err) => {
                warn!(job_id = %job_id, error = %err, "status check failed; continuing to poll");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;
    use songforge_core::UserId;
    use songforge_credits::{CreditAccount, CreditTier};
    use songforge_events::{EventBus, InMemoryEventBus, subscribe_channel};
    use songforge_providers::{Artifact, PollStatus, RecordingSleeper, ScriptedProvider};

    use super::*;
    use crate::jobs::{JobKind, JobPayload, JobStatus, NewJob, SongPayload};
    use crate::ledger::InMemoryCreditLedger;
    use crate::results::NewResult;

    struct Fixture {
        stores: Stores,
        bus: Arc<InMemoryEventBus<StatusEvent>>,
        sleeper: Arc<RecordingSleeper>,
        user: UserId,
    }

    impl Fixture {
        fn new(credits: u32) -> Self {
            let user = UserId::new();
            let mut stores = Stores::in_memory(CreditTier::Metered);
            stores.ledger = Arc::new(
                InMemoryCreditLedger::new(CreditTier::Metered)
                    .with_account(CreditAccount::metered(user, credits, Utc::now())),
            );
            Self {
                stores,
                bus: Arc::new(InMemoryEventBus::new()),
                sleeper: Arc::new(RecordingSleeper::new()),
                user,
            }
        }

        fn worker(&self, music: Arc<ScriptedProvider>, packaging: bool) -> Worker {
            let mut providers = Providers::new(music.clone(), music.clone());
            if packaging {
                providers = providers.with_packaging(music);
            }
            let config = WorkerConfig::default()
                .with_poll(PollPolicy::fixed(3, Duration::from_millis(10)))
                .with_packaging_poll(PollPolicy::fixed(2, Duration::from_millis(10)));
            Worker::new(self.stores.clone(), providers, self.bus.clone(), config).with_sleeper(self.sleeper.clone())
        }

        /// Reserve like the intake does, then enqueue a song job.
        async fn song_job(&self, correlation_id: Option<&str>, package_video: bool) -> Job {
            assert!(self.stores.ledger.reserve(self.user).await.unwrap());
            let record = self
                .stores
                .results
                .create_pending(NewResult::new(self.user, "a song about rain"))
                .await
                .unwrap();
            let payload = JobPayload::Song(SongPayload {
                result_id: record.id,
                prompt: "a song about rain".into(),
                style: None,
                title: None,
                reserved_credit: true,
                package_video,
            });
            let new_job = NewJob::new(self.user, &payload)
                .unwrap()
                .with_correlation_id(correlation_id.map(str::to_string));
            self.stores.jobs.enqueue(new_job).await.unwrap()
        }

        async fn credits(&self) -> u32 {
            self.stores.ledger.account(self.user).await.unwrap().credits_remaining
        }
    }

    #[tokio::test]
    async fn immediate_result_succeeds_and_publishes() {
        let fx = Fixture::new(1);
        let music = Arc::new(
            ScriptedProvider::new()
                .with_correlation_id("abc123")
                .with_immediate(Artifact::audio("https://cdn/a.mp3").with_duration(42)),
        );
        let worker = fx.worker(music.clone(), false);
        let job = fx.song_job(None, false).await;
        let (_sub, mut rx) = subscribe_channel(fx.bus.as_ref(), "abc123");

        assert_eq!(worker.run_once().await.unwrap(), Some(ProcessOutcome::Succeeded));

        let stored = fx.stores.jobs.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Succeeded);
        assert_eq!(stored.result.as_deref(), Some("https://cdn/a.mp3"));
        assert_eq!(stored.provider_correlation_id.as_deref(), Some("abc123"));

        let record = fx.stores.results.get(job.result_id().unwrap()).await.unwrap().unwrap();
        assert_eq!(record.preview_url.as_deref(), Some("https://cdn/a.mp3"));
        assert_eq!(record.duration_secs, Some(42));

        assert_eq!(rx.recv().await.unwrap().status, StreamStatus::Submitted);
        let done = rx.recv().await.unwrap();
        assert_eq!(done.status, StreamStatus::Complete);
        assert_eq!(done.job_id, Some(job.id));
        assert_eq!(fx.credits().await, 0);
        assert_eq!(music.poll_calls(), 0);
    }

    #[tokio::test]
    async fn polls_existing_correlation_id_without_resubmitting() {
        let fx = Fixture::new(1);
        let music = Arc::new(
            ScriptedProvider::new()
                .then_poll(PollStatus::Pending)
                .then_poll(PollStatus::Complete(Artifact::audio("https://cdn/b.mp3"))),
        );
        let worker = fx.worker(music.clone(), false);
        let job = fx.song_job(Some("abc123"), false).await;

        assert_eq!(worker.run_once().await.unwrap(), Some(ProcessOutcome::Succeeded));
        assert_eq!(music.submit_calls(), 0);
        assert_eq!(music.poll_calls(), 2);
        assert_eq!(fx.sleeper.calls().len(), 2);

        let record = fx.stores.results.get(job.result_id().unwrap()).await.unwrap().unwrap();
        assert_eq!(record.duration_secs, Some(SONG_DEFAULT_DURATION_SECS));
    }

    #[tokio::test]
    async fn poll_timeout_fails_and_refunds_once() {
        let fx = Fixture::new(1);
        let music = Arc::new(ScriptedProvider::new());
        let worker = fx.worker(music.clone(), false);
        let job = fx.song_job(None, false).await;
        assert_eq!(fx.credits().await, 0);

        assert_eq!(worker.run_once().await.unwrap(), Some(ProcessOutcome::Failed));

        let stored = fx.stores.jobs.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored.error.as_deref().unwrap().contains("3 poll attempts"));
        assert_eq!(music.poll_calls(), 3);
        assert_eq!(fx.credits().await, 1);

        // A late second failure attempt is a no-op.
        assert_eq!(worker.fail(&stored, "late").await, ProcessOutcome::Superseded);
        assert_eq!(fx.credits().await, 1);

        let stats = worker.stats().snapshot();
        assert_eq!(stats.jobs_failed, 1);
        assert_eq!(stats.credits_refunded, 1);
    }

    #[tokio::test]
    async fn provider_error_status_fails_job() {
        let fx = Fixture::new(1);
        let music = Arc::new(ScriptedProvider::new().always(PollStatus::Error("content policy".into())));
        let worker = fx.worker(music, false);
        let job = fx.song_job(None, false).await;

        assert_eq!(worker.run_once().await.unwrap(), Some(ProcessOutcome::Failed));
        let stored = fx.stores.jobs.get(job.id).await.unwrap().unwrap();
        assert!(stored.error.unwrap().contains("content policy"));
        assert_eq!(fx.credits().await, 1);
    }

    #[tokio::test]
    async fn malformed_payload_fails_without_provider_call() {
        let fx = Fixture::new(0);
        let music = Arc::new(ScriptedProvider::new());
        let worker = fx.worker(music.clone(), false);
        let job = fx
            .stores
            .jobs
            .enqueue(NewJob {
                user_id: fx.user,
                kind: JobKind::Song,
                payload: json!({"reserved_credit": true, "prompt": 12}),
                provider_correlation_id: None,
            })
            .await
            .unwrap();

        assert_eq!(worker.run_once().await.unwrap(), Some(ProcessOutcome::Failed));
        let stored = fx.stores.jobs.get(job.id).await.unwrap().unwrap();
        assert!(stored.error.unwrap().starts_with("malformed job payload"));
        assert_eq!(music.submit_calls(), 0);
        // The raw reservation flag still drives the refund.
        assert_eq!(fx.credits().await, 1);
    }

    #[tokio::test]
    async fn packaging_timeout_keeps_audio() {
        let fx = Fixture::new(1);
        let music = Arc::new(
            ScriptedProvider::new().with_immediate(Artifact::audio("https://cdn/c.mp3").with_id("clip-1")),
        );
        let worker = fx.worker(music.clone(), true);
        let job = fx.song_job(None, true).await;

        assert_eq!(worker.run_once().await.unwrap(), Some(ProcessOutcome::Succeeded));
        assert_eq!(music.packaging_calls(), 1);

        let stored = fx.stores.jobs.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.result.as_deref(), Some("https://cdn/c.mp3"));
        let record = fx.stores.results.get(job.result_id().unwrap()).await.unwrap().unwrap();
        assert_eq!(record.full_url.as_deref(), Some("https://cdn/c.mp3"));
        assert_eq!(fx.credits().await, 0);
    }

    #[tokio::test]
    async fn packaging_success_sets_full_url_to_video() {
        let fx = Fixture::new(1);
        let music = Arc::new(
            ScriptedProvider::new()
                .with_immediate(Artifact::audio("https://cdn/d.mp3"))
                .then_packaging(PollStatus::Complete(Artifact::default().with_video("https://cdn/d.mp4"))),
        );
        let worker = fx.worker(music, true);
        let job = fx.song_job(None, true).await;

        assert_eq!(worker.run_once().await.unwrap(), Some(ProcessOutcome::Succeeded));
        let record = fx.stores.results.get(job.result_id().unwrap()).await.unwrap().unwrap();
        assert_eq!(record.preview_url.as_deref(), Some("https://cdn/d.mp3"));
        assert_eq!(record.full_url.as_deref(), Some("https://cdn/d.mp4"));
    }

    #[tokio::test]
    async fn empty_queue_returns_none() {
        let fx = Fixture::new(0);
        let worker = fx.worker(Arc::new(ScriptedProvider::new()), false);
        assert_eq!(worker.run_once().await.unwrap(), None);
        assert_eq!(fx.bus.subscriber_count("anything"), 0);
    }

    #[tokio::test]
    async fn spawned_worker_drains_queue_and_stops() {
        let fx = Fixture::new(2);
        let music = Arc::new(ScriptedProvider::new().with_immediate(Artifact::audio("https://cdn/e.mp3")));
        let worker = fx.worker(music, false);
        let first = fx.song_job(None, false).await;
        let second = fx.song_job(None, false).await;

        let handle = worker.spawn();
        for _ in 0..1000 {
            if fx.stores.jobs.stats().await.unwrap().succeeded == 2 {
                break;
            }
            tokio::task::yield_now().await;
        }
        let stats = handle.stats();
        handle.shutdown().await;

        assert_eq!(stats.jobs_succeeded, 2);
        for id in [first.id, second.id] {
            assert_eq!(fx.stores.jobs.get(id).await.unwrap().unwrap().status, JobStatus::Succeeded);
        }
    }
}
