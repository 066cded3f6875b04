//! Request-side entry point: reserve, record, optionally submit, enqueue.
//!
//! ## Compensation
//!
//! Once a credit is reserved, any later failure (placeholder record, provider
//! submit, enqueue) hands the credit back before the error is returned. A job
//! row only exists if every step succeeded, so the worker's refund path and
//! the intake's never cover the same reservation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use songforge_core::{JobId, ResultId, UserId};
use songforge_events::{StatusEvent, StreamStatus};
use songforge_providers::{
    CompletionMode, GenerationSpec, NudgeMood, ProviderAdapter, ProviderError, nudge_spec, song_spec,
};

use crate::jobs::{
    Job, JobPayload, JobStoreError, NewJob, NudgePayload, SongPayload, VideoPackagingPayload,
};
use crate::ledger::LedgerError;
use crate::pipeline::{Providers, StatusBus, Stores};
use crate::results::{NewResult, ResultSinkError};

/// Minimum prompt length after trimming.
pub const MIN_PROMPT_CHARS: usize = 5;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("insufficient credits")]
    InsufficientCredits,

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl From<JobStoreError> for GenerationError {
    fn from(err: JobStoreError) -> Self {
        GenerationError::Persistence(err.to_string())
    }
}

impl From<LedgerError> for GenerationError {
    fn from(err: LedgerError) -> Self {
        GenerationError::Persistence(err.to_string())
    }
}

impl From<ResultSinkError> for GenerationError {
    fn from(err: ResultSinkError) -> Self {
        GenerationError::Persistence(err.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongRequest {
    pub prompt: String,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub package_video: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NudgeRequest {
    #[serde(default)]
    pub mood: Option<String>,
    pub story: String,
    #[serde(default)]
    pub motivation: Option<String>,
}

/// Packaging request for an existing song.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoRequest {
    /// Correlation id of the generation that produced the audio.
    pub correlation_id: String,
    #[serde(default)]
    pub audio_id: Option<String>,
}

/// Successful intake.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Accepted {
    pub job_id: JobId,
    pub result_id: ResultId,
    pub correlation_id: Option<String>,
    #[serde(skip)]
    pub job: Job,
}

#[derive(Debug, Clone, Default)]
pub struct IntakeConfig {
    /// Submit to callback-capable providers before the job row is written,
    /// so the correlation id is known to the caller and the callback receiver.
    /// Polling providers are always submitted by the worker.
    pub submit_on_enqueue: bool,
    /// Public URL of the callback receiver.
    pub callback_url: Option<String>,
}

#[derive(Clone)]
pub struct Intake {
    stores: Stores,
    providers: Providers,
    bus: StatusBus,
    config: IntakeConfig,
}

impl std::fmt::Debug for Intake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Intake")
            .field("providers", &self.providers)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Intake {
    pub fn new(stores: Stores, providers: Providers, bus: StatusBus, config: IntakeConfig) -> Self {
        Self {
            stores,
            providers,
            bus,
            config,
        }
    }

    #[instrument(skip(self, request), fields(user_id = %user_id), err)]
    pub async fn enqueue_song(&self, user_id: UserId, request: SongRequest) -> Result<Accepted, GenerationError> {
        let prompt = request.prompt.trim().to_string();
        if prompt.chars().count() < MIN_PROMPT_CHARS {
            return Err(GenerationError::Validation(format!(
                "prompt must be at least {MIN_PROMPT_CHARS} characters"
            )));
        }
        let spec = song_spec(
            &prompt,
            request.style.as_deref(),
            request.title.as_deref(),
            self.callback_for(self.providers.music.as_ref()),
        );
        let new_result = NewResult::new(user_id, prompt.clone())
            .with_title(request.title.clone())
            .with_style(request.style.clone());
        let music = self.providers.music.clone();

        self.with_reservation(user_id, move |result_id| {
            JobPayload::Song(SongPayload {
                result_id,
                prompt,
                style: request.style,
                title: request.title,
                reserved_credit: true,
                package_video: request.package_video,
            })
        }, new_result, Some((music, spec)))
        .await
    }

    #[instrument(skip(self, request), fields(user_id = %user_id), err)]
    pub async fn enqueue_nudge(&self, user_id: UserId, request: NudgeRequest) -> Result<Accepted, GenerationError> {
        let story = request.story.trim().to_string();
        if story.is_empty() {
            return Err(GenerationError::Validation("story must not be empty".into()));
        }
        let mood = match request.mood.as_deref() {
            None => NudgeMood::default(),
            Some(raw) => raw.parse().map_err(GenerationError::Validation)?,
        };
        let motivation = request
            .motivation
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());
        let spec = nudge_spec(mood, &story, motivation.as_deref());
        let new_result = NewResult::new(user_id, story.clone())
            .with_title(Some(format!("Daily Nudge - {}", mood.as_str())))
            .with_style(Some(mood.background_style().to_string()));
        let voice = self.providers.voice.clone();

        self.with_reservation(user_id, move |result_id| {
            JobPayload::DailyNudge(NudgePayload {
                result_id,
                mood,
                story,
                motivation,
                reserved_credit: true,
            })
        }, new_result, Some((voice, spec)))
        .await
    }

    /// Queue the packaging step for a song the caller owns. No credit is taken.
    #[instrument(skip(self, request), fields(user_id = %user_id, result_id = %result_id), err)]
    pub async fn enqueue_video(
        &self,
        user_id: UserId,
        result_id: ResultId,
        request: VideoRequest,
    ) -> Result<Accepted, GenerationError> {
        let correlation_id = request.correlation_id.trim().to_string();
        if correlation_id.is_empty() {
            return Err(GenerationError::Validation("correlation_id is required".into()));
        }
        if self.providers.packaging.is_none() {
            return Err(GenerationError::Validation("video packaging is not configured".into()));
        }
        let record = self
            .stores
            .results
            .get(result_id)
            .await?
            .filter(|r| r.user_id == user_id)
            .ok_or_else(|| GenerationError::NotFound(format!("song {result_id}")))?;
        let Some(audio_url) = record.preview_url.clone().or(record.full_url.clone()) else {
            return Err(GenerationError::Validation("song has no audio yet".into()));
        };

        let payload = JobPayload::VideoPackaging(VideoPackagingPayload {
            result_id,
            source_correlation_id: correlation_id.clone(),
            audio_id: request.audio_id,
            audio_url: Some(audio_url),
            duration_secs: record.duration_secs,
        });
        let new_job = NewJob::new(user_id, &payload)
            .map_err(|e| GenerationError::Persistence(e.to_string()))?;
        let job = self.stores.jobs.enqueue(new_job).await?;
        info!(job_id = %job.id, "video packaging queued");
        Ok(Accepted {
            job_id: job.id,
            result_id,
            correlation_id: None,
            job,
        })
    }

    fn callback_for(&self, provider: &dyn ProviderAdapter) -> Option<String> {
        match provider.completion_mode() {
            CompletionMode::Callback => self.config.callback_url.clone(),
            CompletionMode::Polling => None,
        }
    }

    /// Reserve, then run the remaining steps; refund if any of them fails.
    async fn with_reservation(
        &self,
        user_id: UserId,
        payload: impl FnOnce(ResultId) -> JobPayload + Send,
        new_result: NewResult,
        submit: Option<(Arc<dyn ProviderAdapter>, GenerationSpec)>,
    ) -> Result<Accepted, GenerationError> {
        if !self.stores.ledger.reserve(user_id).await? {
            return Err(GenerationError::InsufficientCredits);
        }

        match self.after_reserve(user_id, payload, new_result, submit).await {
            Ok(accepted) => Ok(accepted),
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "intake failed after reserve; refunding");
                if let Err(refund_err) = self.stores.ledger.refund(user_id, 1).await {
                    warn!(user_id = %user_id, error = %refund_err, "refund after failed intake did not apply");
                }
                Err(err)
            }
        }
    }

    async fn after_reserve(
        &self,
        user_id: UserId,
        payload: impl FnOnce(ResultId) -> JobPayload + Send,
        new_result: NewResult,
        submit: Option<(Arc<dyn ProviderAdapter>, GenerationSpec)>,
    ) -> Result<Accepted, GenerationError> {
        let record = self.stores.results.create_pending(new_result).await?;
        let payload = payload(record.id);

        let correlation_id = match submit {
            Some((provider, spec))
                if self.config.submit_on_enqueue && provider.completion_mode() == CompletionMode::Callback =>
            {
                let submission = provider.submit(&spec).await?;
                info!(
                    provider = provider.name(),
                    correlation_id = %submission.correlation_id,
                    "submitted on enqueue"
                );
                Some(submission.correlation_id)
            }
            _ => None,
        };

        let new_job = NewJob::new(user_id, &payload)
            .map_err(|e| GenerationError::Persistence(e.to_string()))?
            .with_correlation_id(correlation_id.clone());
        let job = self.stores.jobs.enqueue(new_job).await?;

        if let Some(cid) = &correlation_id {
            self.bus.publish(
                cid,
                StatusEvent::new(cid.clone(), StreamStatus::Submitted)
                    .with_job(job.id)
                    .with_result(Some(record.id)),
            );
        }
        info!(job_id = %job.id, kind = %job.kind, result_id = %record.id, "job queued");

        Ok(Accepted {
            job_id: job.id,
            result_id: record.id,
            correlation_id,
            job,
        })
    }
}
