//! Inbound provider notifications.
//!
//! The receiver finalizes successful generations directly and races the
//! worker's polling path for the same job; the job store's conditional
//! transitions decide the winner. It never touches the credit ledger: a
//! provider-reported failure is only broadcast, and the worker's own poll
//! observes the same failure and performs the single refund.

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use songforge_events::{StatusEvent, StreamStatus};
use songforge_providers::{Artifact, PollStatus, parse};

use crate::jobs::{Job, JobKind, JobStoreError};
use crate::pipeline::{StatusBus, Stores};
use crate::results::{ArtifactSet, ResultSinkError};
use crate::worker::{NUDGE_DEFAULT_DURATION_SECS, SONG_DEFAULT_DURATION_SECS};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallbackError {
    #[error("invalid json: {0}")]
    InvalidPayload(String),

    #[error("missing task id")]
    MissingCorrelationId,

    #[error("callback storage error: {0}")]
    Store(String),
}

impl From<JobStoreError> for CallbackError {
    fn from(err: JobStoreError) -> Self {
        CallbackError::Store(err.to_string())
    }
}

impl From<ResultSinkError> for CallbackError {
    fn from(err: ResultSinkError) -> Self {
        CallbackError::Store(err.to_string())
    }
}

/// What the receiver did with a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// This call moved the job to `succeeded`.
    Finalized { correlation_id: String },
    /// The job was already terminal; nothing was written.
    AlreadyFinal { correlation_id: String },
    /// No job carries this correlation id; the event was still published.
    NotFound { correlation_id: String },
    /// Provider reported a failure; broadcast only.
    ProviderError { correlation_id: String, reason: String },
    /// Intermediate notification without final media.
    Progress { correlation_id: String },
}

impl CallbackOutcome {
    pub fn correlation_id(&self) -> &str {
        match self {
            CallbackOutcome::Finalized { correlation_id }
            | CallbackOutcome::AlreadyFinal { correlation_id }
            | CallbackOutcome::NotFound { correlation_id }
            | CallbackOutcome::ProviderError { correlation_id, .. }
            | CallbackOutcome::Progress { correlation_id } => correlation_id,
        }
    }
}

/// Classified notification body.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Notice {
    Complete(Artifact),
    Failed(String),
    Progress,
}

fn classify(body: &Value, items: &Value) -> Notice {
    let code = body.get("code").and_then(Value::as_i64);
    let callback_type = parse::first_str(body, &[&["data", "callbackType"], &["data", "callback_type"], &["callbackType"]])
        .unwrap_or_default()
        .to_ascii_lowercase();

    if callback_type == "error" || code.is_some_and(|c| c != 200 && c != 0) {
        let reason = parse::first_str(body, &[&["msg"], &["data", "errorMessage"], &["message"]])
            .unwrap_or_else(|| "provider reported an error".to_string());
        return Notice::Failed(reason);
    }
    if let PollStatus::Error(reason) = parse::poll_status(body) {
        return Notice::Failed(reason);
    }

    let artifact = parse::first_item(items).map(parse::artifact_from_item).unwrap_or_default();
    if artifact.has_media() {
        Notice::Complete(artifact)
    } else {
        Notice::Progress
    }
}

#[derive(Clone)]
pub struct CallbackReceiver {
    stores: Stores,
    bus: StatusBus,
}

impl std::fmt::Debug for CallbackReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackReceiver").finish_non_exhaustive()
    }
}

impl CallbackReceiver {
    pub fn new(stores: Stores, bus: StatusBus) -> Self {
        Self { stores, bus }
    }

    /// Parse and handle a raw request body.
    pub async fn handle_bytes(&self, body: &[u8]) -> Result<CallbackOutcome, CallbackError> {
        let value: Value =
            serde_json::from_slice(body).map_err(|e| CallbackError::InvalidPayload(e.to_string()))?;
        self.handle(value).await
    }

    #[instrument(skip(self, body), err)]
    pub async fn handle(&self, body: Value) -> Result<CallbackOutcome, CallbackError> {
        if !body.is_object() {
            return Err(CallbackError::InvalidPayload("expected a json object".into()));
        }
        let correlation_id = parse::correlation_id(&body).ok_or(CallbackError::MissingCorrelationId)?;
        let items = parse::items(&body);
        let notice = classify(&body, &items);

        let Some(job) = self.stores.jobs.find_by_correlation_id(&correlation_id).await? else {
            warn!(correlation_id = %correlation_id, "callback for unknown job");
            self.bus.publish(&correlation_id, unmatched_event(&correlation_id, &notice, items));
            return Ok(CallbackOutcome::NotFound { correlation_id });
        };

        match notice {
            Notice::Failed(reason) => {
                warn!(correlation_id = %correlation_id, job_id = %job.id, reason = %reason, "provider reported failure");
                if !job.status.is_terminal() {
                    self.bus.publish(
                        &correlation_id,
                        StatusEvent::failed(correlation_id.clone(), reason.clone())
                            .with_job(job.id)
                            .with_result(job.result_id()),
                    );
                }
                Ok(CallbackOutcome::ProviderError { correlation_id, reason })
            }
            Notice::Progress => {
                debug!(correlation_id = %correlation_id, job_id = %job.id, "progress callback");
                if !job.status.is_terminal() {
                    self.bus.publish(
                        &correlation_id,
                        StatusEvent::new(correlation_id.clone(), StreamStatus::Submitted)
                            .with_job(job.id)
                            .with_result(job.result_id())
                            .with_raw(items),
                    );
                }
                Ok(CallbackOutcome::Progress { correlation_id })
            }
            Notice::Complete(artifact) => self.finalize(job, correlation_id, artifact).await,
        }
    }

    async fn finalize(&self, job: Job, correlation_id: String, artifact: Artifact) -> Result<CallbackOutcome, CallbackError> {
        if job.status.is_terminal() {
            debug!(correlation_id = %correlation_id, job_id = %job.id, "callback for finalized job");
            return Ok(CallbackOutcome::AlreadyFinal { correlation_id });
        }

        let artifacts = ArtifactSet::from_artifact(&artifact).with_default_duration(default_duration(job.kind));
        let result_id = job.result_id();
        match result_id {
            Some(id) => {
                if !self.stores.results.set_artifacts(id, &artifacts).await? {
                    warn!(job_id = %job.id, result_id = %id, "result record missing");
                }
            }
            None => warn!(job_id = %job.id, "job payload carries no result id"),
        }

        let result = artifacts
            .full_url
            .clone()
            .or_else(|| artifacts.preview_url.clone())
            .unwrap_or_default();
        if !self.stores.jobs.mark_succeeded(job.id, &result).await? {
            debug!(correlation_id = %correlation_id, job_id = %job.id, "lost finalize race");
            return Ok(CallbackOutcome::AlreadyFinal { correlation_id });
        }

        info!(correlation_id = %correlation_id, job_id = %job.id, "job finalized by callback");
        self.bus.publish(
            &correlation_id,
            StatusEvent::complete(correlation_id.clone())
                .with_job(job.id)
                .with_result(result_id)
                .with_artifacts(artifacts.preview_url, artifacts.full_url, artifacts.duration_secs),
        );
        Ok(CallbackOutcome::Finalized { correlation_id })
    }
}

fn default_duration(kind: JobKind) -> u32 {
    match kind {
        JobKind::DailyNudge => NUDGE_DEFAULT_DURATION_SECS,
        JobKind::Song | JobKind::VideoPackaging => SONG_DEFAULT_DURATION_SECS,
    }
}

/// Event for a notification that matched no job; carries the provider items as-is.
fn unmatched_event(correlation_id: &str, notice: &Notice, items: Value) -> StatusEvent {
    let event = match notice {
        Notice::Complete(artifact) => StatusEvent::complete(correlation_id).with_artifacts(
            artifact.preview_url().map(str::to_string),
            artifact.full_url().map(str::to_string),
            artifact.duration_secs,
        ),
        Notice::Failed(reason) => StatusEvent::failed(correlation_id, reason.clone()),
        Notice::Progress => StatusEvent::new(correlation_id, StreamStatus::Submitted),
    };
    event.with_raw(items)
}
