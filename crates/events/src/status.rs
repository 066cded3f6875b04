//! Status payload pushed to live clients.

use serde::{Deserialize, Serialize};

use songforge_core::{JobId, ResultId};

/// Coarse job status as seen by a watching client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    /// Provider accepted the request; generation in progress.
    Submitted,
    /// Artifact is ready.
    Complete,
    /// Generation failed or timed out.
    Failed,
}

impl StreamStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamStatus::Complete | StreamStatus::Failed)
    }
}

/// Event published on the bus under a provider correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub correlation_id: String,
    pub status: StreamStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_id: Option<ResultId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Provider items as received, when the event comes straight from a callback.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

impl StatusEvent {
    pub fn new(correlation_id: impl Into<String>, status: StreamStatus) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            status,
            job_id: None,
            result_id: None,
            audio_url: None,
            video_url: None,
            duration_secs: None,
            reason: None,
            raw: None,
        }
    }

    pub fn complete(correlation_id: impl Into<String>) -> Self {
        Self::new(correlation_id, StreamStatus::Complete)
    }

    pub fn failed(correlation_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::new(correlation_id, StreamStatus::Failed)
        }
    }

    pub fn with_job(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn with_result(mut self, result_id: Option<ResultId>) -> Self {
        self.result_id = result_id;
        self
    }

    pub fn with_artifacts(
        mut self,
        audio_url: Option<String>,
        video_url: Option<String>,
        duration_secs: Option<u32>,
    ) -> Self {
        self.audio_url = audio_url;
        self.video_url = video_url;
        self.duration_secs = duration_secs;
        self
    }

    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = Some(raw);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
