//! Callback-capable music provider with an mp4 packaging step.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::info;

use crate::adapter::{PackagingAdapter, ProviderAdapter};
use crate::error::ProviderError;
use crate::http::HttpClient;
use crate::parse;
use crate::types::{Artifact, CompletionMode, GenerationSpec, PollStatus, Submission};

pub const DEFAULT_BASE_URL: &str = "https://api.sunoapi.org";
const DEFAULT_MODEL: &str = "V4";

#[derive(Debug, Clone)]
pub struct SunoConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub request_timeout: Duration,
}

impl SunoConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            request_timeout: Duration::from_secs(15),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Music generation over the provider's task API.
///
/// Submit returns a task id; completion arrives on the callback URL when one
/// is set and is always observable through `record-info` polling.
#[derive(Debug, Clone)]
pub struct SunoProvider {
    http: HttpClient,
    model: String,
}

impl SunoProvider {
    pub fn new(config: SunoConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            http: HttpClient::new(config.base_url, config.api_key, config.request_timeout)?,
            model: config.model,
        })
    }

    fn task_id(body: &Value) -> Result<String, ProviderError> {
        parse::correlation_id(body)
            .ok_or_else(|| ProviderError::InvalidResponse("no task id in submit response".into()))
    }
}

#[async_trait]
impl ProviderAdapter for SunoProvider {
    fn name(&self) -> &'static str {
        "suno"
    }

    fn completion_mode(&self) -> CompletionMode {
        CompletionMode::Callback
    }

    async fn submit(&self, spec: &GenerationSpec) -> Result<Submission, ProviderError> {
        let mut body = Map::new();
        body.insert("prompt".into(), json!(spec.prompt));
        body.insert("model".into(), json!(self.model));
        body.insert("instrumental".into(), json!(false));
        body.insert("customMode".into(), json!(spec.style.is_some() || spec.title.is_some()));
        if let Some(style) = spec.style.as_ref().or(spec.tags.as_ref()) {
            body.insert("style".into(), json!(style));
        }
        if let Some(title) = &spec.title {
            body.insert("title".into(), json!(title));
        }
        if let Some(url) = &spec.callback_url {
            body.insert("callBackUrl".into(), json!(url));
        }

        let resp = self.http.post_json("/api/v1/generate", &Value::Object(body)).await?;
        let task_id = Self::task_id(&resp)?;
        info!(provider = "suno", task_id = %task_id, callback = spec.callback_url.is_some(), "submitted");
        Ok(Submission::pending(task_id))
    }

    async fn poll(&self, correlation_id: &str) -> Result<PollStatus, ProviderError> {
        let resp = self
            .http
            .get_json("/api/v1/generate/record-info", &[("taskId", correlation_id)])
            .await?;
        Ok(parse::poll_status(&resp))
    }
}

#[async_trait]
impl PackagingAdapter for SunoProvider {
    async fn submit_packaging(
        &self,
        correlation_id: &str,
        primary: &Artifact,
        callback_url: Option<&str>,
    ) -> Result<String, ProviderError> {
        let audio_id = primary
            .id
            .as_deref()
            .ok_or_else(|| ProviderError::rejected("primary artifact has no provider id"))?;

        let mut body = json!({ "taskId": correlation_id, "audioId": audio_id });
        if let Some(url) = callback_url {
            body["callBackUrl"] = json!(url);
        }
        let resp = self.http.post_json("/api/v1/mp4/generate", &body).await?;
        Self::task_id(&resp)
    }

    async fn poll_packaging(&self, packaging_id: &str) -> Result<PollStatus, ProviderError> {
        let resp = self
            .http
            .get_json("/api/v1/mp4/record-info", &[("taskId", packaging_id)])
            .await?;

        // Packaging records carry a single video URL rather than an item list.
        if let Some(video_url) = parse::first_str(
            &resp,
            &[&["data", "response", "videoUrl"], &["data", "video_url"], &["data", "mp4_url"]],
        ) {
            return Ok(PollStatus::Complete(Artifact {
                video_url: Some(video_url),
                ..Artifact::default()
            }));
        }
        Ok(match parse::poll_status(&resp) {
            PollStatus::Complete(a) if a.video_url.is_none() => PollStatus::Pending,
            other => other,
        })
    }
}
