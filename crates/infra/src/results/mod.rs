//! Result sink: the song / nudge record a job fills in on success.
//!
//! Records are created as placeholders before the job is enqueued and are
//! only ever written through [`ResultSink::set_artifacts`], keyed by the id
//! carried in the job payload.

pub mod postgres;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use songforge_core::{ResultId, UserId};
use songforge_providers::Artifact;

pub use postgres::PostgresResultSink;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub id: ResultId,
    pub user_id: UserId,
    pub title: Option<String>,
    pub prompt: String,
    pub style: Option<String>,
    pub preview_url: Option<String>,
    pub full_url: Option<String>,
    pub duration_secs: Option<u32>,
    /// Lyrics or spoken text.
    pub text: Option<String>,
    /// Set by the purchase flow; never touched by job processing.
    pub unlocked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResultRecord {
    pub fn is_ready(&self) -> bool {
        self.preview_url.is_some() || self.full_url.is_some()
    }
}

/// Placeholder created before the job exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewResult {
    pub user_id: UserId,
    pub title: Option<String>,
    pub prompt: String,
    pub style: Option<String>,
}

impl NewResult {
    pub fn new(user_id: UserId, prompt: impl Into<String>) -> Self {
        Self {
            user_id,
            title: None,
            prompt: prompt.into(),
            style: None,
        }
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }

    pub fn with_style(mut self, style: Option<String>) -> Self {
        self.style = style;
        self
    }
}

/// Final artifact fields. `None` leaves the stored value as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSet {
    pub preview_url: Option<String>,
    pub full_url: Option<String>,
    pub duration_secs: Option<u32>,
    pub text: Option<String>,
}

impl ArtifactSet {
    /// Preview is the audio, full is the packaged video when present.
    pub fn from_artifact(artifact: &Artifact) -> Self {
        Self {
            preview_url: artifact.preview_url().map(str::to_string),
            full_url: artifact.full_url().map(str::to_string),
            duration_secs: artifact.duration_secs,
            text: artifact.text.clone(),
        }
    }

    pub fn with_default_duration(mut self, secs: u32) -> Self {
        self.duration_secs.get_or_insert(secs);
        self
    }

    pub fn with_text(mut self, text: Option<String>) -> Self {
        if self.text.is_none() {
            self.text = text;
        }
        self
    }
}

impl From<&Artifact> for ArtifactSet {
    fn from(artifact: &Artifact) -> Self {
        Self::from_artifact(artifact)
    }
}

#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn create_pending(&self, new: NewResult) -> Result<ResultRecord, ResultSinkError>;

    /// Idempotent, last write wins. `false` when the record does not exist.
    async fn set_artifacts(&self, id: ResultId, artifacts: &ArtifactSet) -> Result<bool, ResultSinkError>;

    async fn get(&self, id: ResultId) -> Result<Option<ResultRecord>, ResultSinkError>;
}

#[async_trait]
impl<S> ResultSink for Arc<S>
where
    S: ResultSink + ?Sized,
{
    async fn create_pending(&self, new: NewResult) -> Result<ResultRecord, ResultSinkError> {
        (**self).create_pending(new).await
    }

    async fn set_artifacts(&self, id: ResultId, artifacts: &ArtifactSet) -> Result<bool, ResultSinkError> {
        (**self).set_artifacts(id, artifacts).await
    }

    async fn get(&self, id: ResultId) -> Result<Option<ResultRecord>, ResultSinkError> {
        (**self).get(id).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResultSinkError {
    #[error("result storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Default)]
pub struct InMemoryResultSink {
    records: RwLock<HashMap<ResultId, ResultRecord>>,
}

impl InMemoryResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

fn poisoned() -> ResultSinkError {
    ResultSinkError::Storage("result sink lock poisoned".into())
}

#[async_trait]
impl ResultSink for InMemoryResultSink {
    async fn create_pending(&self, new: NewResult) -> Result<ResultRecord, ResultSinkError> {
        let now = Utc::now();
        let record = ResultRecord {
            id: ResultId::new(),
            user_id: new.user_id,
            title: new.title,
            prompt: new.prompt,
            style: new.style,
            preview_url: None,
            full_url: None,
            duration_secs: None,
            text: None,
            unlocked: false,
            created_at: now,
            updated_at: now,
        };
        let mut records = self.records.write().map_err(|_| poisoned())?;
        records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn set_artifacts(&self, id: ResultId, artifacts: &ArtifactSet) -> Result<bool, ResultSinkError> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        let Some(record) = records.get_mut(&id) else {
            return Ok(false);
        };
        if let Some(url) = &artifacts.preview_url {
            record.preview_url = Some(url.clone());
        }
        if let Some(url) = &artifacts.full_url {
            record.full_url = Some(url.clone());
        }
        if let Some(secs) = artifacts.duration_secs {
            record.duration_secs = Some(secs);
        }
        if let Some(text) = &artifacts.text {
            record.text = Some(text.clone());
        }
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn get(&self, id: ResultId) -> Result<Option<ResultRecord>, ResultSinkError> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.get(&id).cloned())
    }
}
