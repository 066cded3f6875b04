//! Generation job record, kinds and typed payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use songforge_core::{JobId, ResultId, UserId};
use songforge_providers::NudgeMood;

/// Workflow selector. Adding a workflow is a compile-checked change to every
/// `match` on this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    #[serde(rename = "song")]
    Song,
    #[serde(rename = "daily-nudge")]
    DailyNudge,
    #[serde(rename = "video-packaging")]
    VideoPackaging,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Song => "song",
            JobKind::DailyNudge => "daily-nudge",
            JobKind::VideoPackaging => "video-packaging",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "song" => Some(JobKind::Song),
            "daily-nudge" => Some(JobKind::DailyNudge),
            "video-packaging" => Some(JobKind::VideoPackaging),
            _ => None,
        }
    }
}

impl core::fmt::Display for JobKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job lifecycle: `Pending -> InProgress -> {Succeeded | Failed}`.
///
/// A pending job may also be finalized directly by the callback receiver.
/// Terminal statuses are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "in_progress" => Some(JobStatus::InProgress),
            "succeeded" => Some(JobStatus::Succeeded),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// A stored generation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub user_id: UserId,
    pub kind: JobKind,
    /// Kind-specific data, decoded by the worker into a [`JobPayload`].
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub provider_correlation_id: Option<String>,
    /// Final artifact URL on success.
    pub result: Option<String>,
    /// Failure reason.
    pub error: Option<String>,
    /// Number of times the job was claimed.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Reservation flag read straight from the raw payload, so a refund is
    /// still possible when the rest of the payload does not decode.
    pub fn reserved_credit(&self) -> bool {
        self.payload
            .get("reserved_credit")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    /// Target result entity, read leniently (`result_id`, then `song_id`).
    pub fn result_id(&self) -> Option<ResultId> {
        ["result_id", "song_id"].iter().find_map(|key| {
            self.payload
                .get(*key)
                .and_then(serde_json::Value::as_str)
                .and_then(|s| s.parse().ok())
        })
    }

    pub fn decode_payload(&self) -> Result<JobPayload, serde_json::Error> {
        JobPayload::decode(self.kind, &self.payload)
    }
}

/// Insert request for [`crate::jobs::JobStore::enqueue`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub user_id: UserId,
    pub kind: JobKind,
    pub payload: serde_json::Value,
    pub provider_correlation_id: Option<String>,
}

impl NewJob {
    pub fn new(user_id: UserId, payload: &JobPayload) -> Result<Self, serde_json::Error> {
        Ok(Self {
            user_id,
            kind: payload.kind(),
            payload: payload.to_value()?,
            provider_correlation_id: None,
        })
    }

    pub fn with_correlation_id(mut self, id: Option<String>) -> Self {
        self.provider_correlation_id = id;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongPayload {
    pub result_id: ResultId,
    pub prompt: String,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    pub reserved_credit: bool,
    /// Run the packaging step after the audio is ready.
    #[serde(default)]
    pub package_video: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NudgePayload {
    pub result_id: ResultId,
    pub mood: NudgeMood,
    pub story: String,
    #[serde(default)]
    pub motivation: Option<String>,
    pub reserved_credit: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoPackagingPayload {
    pub result_id: ResultId,
    /// Correlation id of the job that produced the audio.
    pub source_correlation_id: String,
    /// Provider item id of the audio.
    #[serde(default)]
    pub audio_id: Option<String>,
    /// Kept as the result when packaging fails.
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub duration_secs: Option<u32>,
}

/// Decoded job payload, one variant per [`JobKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPayload {
    Song(SongPayload),
    DailyNudge(NudgePayload),
    VideoPackaging(VideoPackagingPayload),
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::Song(_) => JobKind::Song,
            JobPayload::DailyNudge(_) => JobKind::DailyNudge,
            JobPayload::VideoPackaging(_) => JobKind::VideoPackaging,
        }
    }

    pub fn result_id(&self) -> ResultId {
        match self {
            JobPayload::Song(p) => p.result_id,
            JobPayload::DailyNudge(p) => p.result_id,
            JobPayload::VideoPackaging(p) => p.result_id,
        }
    }

    pub fn reserved_credit(&self) -> bool {
        match self {
            JobPayload::Song(p) => p.reserved_credit,
            JobPayload::DailyNudge(p) => p.reserved_credit,
            JobPayload::VideoPackaging(_) => false,
        }
    }

    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            JobPayload::Song(p) => serde_json::to_value(p),
            JobPayload::DailyNudge(p) => serde_json::to_value(p),
            JobPayload::VideoPackaging(p) => serde_json::to_value(p),
        }
    }

    pub fn decode(kind: JobKind, value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            JobKind::Song => JobPayload::Song(serde_json::from_value(value.clone())?),
            JobKind::DailyNudge => JobPayload::DailyNudge(serde_json::from_value(value.clone())?),
            JobKind::VideoPackaging => JobPayload::VideoPackaging(serde_json::from_value(value.clone())?),
        })
    }
}
