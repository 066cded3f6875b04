//! Per-kind workflows run by the worker.

use tracing::{debug, info, warn};

use songforge_providers::{
    Artifact, CompletionMode, GenerationSpec, PackagingAdapter, PollOutcome, Poller, ProviderAdapter,
    ProviderError, nudge_spec, song_spec,
};

use super::{Worker, WorkerError};
use crate::jobs::{Job, JobPayload, NudgePayload, SongPayload, VideoPackagingPayload};
use crate::results::ArtifactSet;

/// Used when the provider does not report a duration.
pub const SONG_DEFAULT_DURATION_SECS: u32 = 20;
pub const NUDGE_DEFAULT_DURATION_SECS: u32 = 15;

pub(super) enum Outcome {
    Completed {
        correlation_id: Option<String>,
        artifacts: ArtifactSet,
    },
    /// The job reached a terminal state through another path.
    Superseded,
}

enum Generated {
    Ready { correlation_id: String, artifact: Artifact },
    Superseded,
}

impl Worker {
    pub(super) async fn execute(&self, job: &Job, payload: JobPayload) -> Result<Outcome, WorkerError> {
        match payload {
            JobPayload::Song(p) => self.run_song(job, &p).await,
            JobPayload::DailyNudge(p) => self.run_nudge(job, &p).await,
            JobPayload::VideoPackaging(p) => self.run_packaging(job, &p).await,
        }
    }

    async fn run_song(&self, job: &Job, p: &SongPayload) -> Result<Outcome, WorkerError> {
        let music = self.providers.music.clone();
        let spec = song_spec(
            &p.prompt,
            p.style.as_deref(),
            p.title.as_deref(),
            self.callback_for(music.as_ref()),
        );
        let (correlation_id, artifact) = match self.generate(job, music.as_ref(), &spec).await? {
            Generated::Ready { correlation_id, artifact } => (correlation_id, artifact),
            Generated::Superseded => return Ok(Outcome::Superseded),
        };

        let artifact = if p.package_video {
            match self.package(job, &correlation_id, &artifact).await {
                Some(packaged) => packaged,
                None => artifact,
            }
        } else {
            artifact
        };

        Ok(Outcome::Completed {
            correlation_id: Some(correlation_id),
            artifacts: ArtifactSet::from_artifact(&artifact).with_default_duration(SONG_DEFAULT_DURATION_SECS),
        })
    }

    async fn run_nudge(&self, job: &Job, p: &NudgePayload) -> Result<Outcome, WorkerError> {
        let voice = self.providers.voice.clone();
        let spec = nudge_spec(p.mood, &p.story, p.motivation.as_deref());
        match self.generate(job, voice.as_ref(), &spec).await? {
            Generated::Ready { correlation_id, artifact } => {
                let text = p
                    .motivation
                    .clone()
                    .unwrap_or_else(|| p.mood.default_motivation().to_string());
                Ok(Outcome::Completed {
                    correlation_id: Some(correlation_id),
                    artifacts: ArtifactSet::from_artifact(&artifact)
                        .with_default_duration(NUDGE_DEFAULT_DURATION_SECS)
                        .with_text(Some(text)),
                })
            }
            Generated::Superseded => Ok(Outcome::Superseded),
        }
    }

    /// Packaging only; the audio stays the result when packaging fails.
    async fn run_packaging(&self, job: &Job, p: &VideoPackagingPayload) -> Result<Outcome, WorkerError> {
        let Some(audio_url) = p.audio_url.clone() else {
            return Err(WorkerError::Payload("video packaging needs an audio url".into()));
        };
        let mut primary = Artifact::audio(audio_url);
        primary.id = p.audio_id.clone();
        primary.duration_secs = p.duration_secs;

        let artifact = match self.package(job, &p.source_correlation_id, &primary).await {
            Some(packaged) => packaged,
            None if !self.still_open(job.id).await => return Ok(Outcome::Superseded),
            None => primary,
        };
        Ok(Outcome::Completed {
            correlation_id: Some(p.source_correlation_id.clone()),
            artifacts: ArtifactSet::from_artifact(&artifact),
        })
    }

    fn callback_for(&self, provider: &dyn ProviderAdapter) -> Option<String> {
        match provider.completion_mode() {
            CompletionMode::Callback => self.config.callback_url.clone(),
            CompletionMode::Polling => None,
        }
    }

    /// Submit unless a correlation id is already recorded, then wait for the artifact.
    async fn generate(
        &self,
        job: &Job,
        provider: &dyn ProviderAdapter,
        spec: &GenerationSpec,
    ) -> Result<Generated, WorkerError> {
        let (correlation_id, immediate) = match &job.provider_correlation_id {
            Some(cid) => (cid.clone(), None),
            None => {
                let submission = provider.submit(spec).await?;
                if !self
                    .stores
                    .jobs
                    .set_correlation_id(job.id, &submission.correlation_id)
                    .await?
                {
                    return Ok(Generated::Superseded);
                }
                info!(
                    job_id = %job.id,
                    provider = provider.name(),
                    correlation_id = %submission.correlation_id,
                    "submitted"
                );
                (submission.correlation_id, submission.immediate)
            }
        };
        self.publish_submitted(&correlation_id, job);

        if let Some(artifact) = immediate {
            return Ok(Generated::Ready { correlation_id, artifact });
        }

        let poller = Poller::new(self.config.poll.clone(), self.sleeper.clone());
        let cid = correlation_id.as_str();
        let outcome = poller
            .run(provider.name(), || provider.poll(cid), || self.still_open(job.id))
            .await?;
        match outcome {
            PollOutcome::Complete(artifact) => Ok(Generated::Ready { correlation_id, artifact }),
            PollOutcome::Abandoned { attempts } => {
                debug!(job_id = %job.id, attempts, "polling stopped; job already final");
                Ok(Generated::Superseded)
            }
        }
    }

    /// Best effort: `None` means keep the primary artifact.
    async fn package(&self, job: &Job, correlation_id: &str, primary: &Artifact) -> Option<Artifact> {
        let packaging = self.providers.packaging.clone()?;
        match self.try_package(job, packaging.as_ref(), correlation_id, primary).await {
            Ok(Some(video_url)) => {
                info!(job_id = %job.id, "packaging complete");
                Some(primary.clone().with_video(video_url))
            }
            Ok(None) => None,
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "packaging failed; keeping primary artifact");
                None
            }
        }
    }

    async fn try_package(
        &self,
        job: &Job,
        packaging: &dyn PackagingAdapter,
        correlation_id: &str,
        primary: &Artifact,
    ) -> Result<Option<String>, ProviderError> {
        // Packaging completes by polling; its task id is not tracked by the callback receiver.
        let packaging_id = packaging.submit_packaging(correlation_id, primary, None).await?;
        let poller = Poller::new(self.config.packaging_poll.clone(), self.sleeper.clone());
        let pid = packaging_id.as_str();
        match poller
            .run("packaging", || packaging.poll_packaging(pid), || self.still_open(job.id))
            .await?
        {
            PollOutcome::Complete(artifact) => Ok(artifact.video_url.or(artifact.audio_url)),
            PollOutcome::Abandoned { .. } => Ok(None),
        }
    }
}
