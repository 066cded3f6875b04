//! Polling-only voice provider used for short spoken nudges.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::adapter::ProviderAdapter;
use crate::error::ProviderError;
use crate::http::HttpClient;
use crate::parse;
use crate::types::{CompletionMode, GenerationSpec, PollStatus, Submission};

pub const DEFAULT_BASE_URL: &str = "https://api.sunoapi.org/v1/suno";

#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub request_timeout: Duration,
}

impl VoiceConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: "chirp-v4".to_string(),
            request_timeout: Duration::from_secs(15),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Debug, Clone)]
pub struct VoiceProvider {
    http: HttpClient,
    model: String,
}

impl VoiceProvider {
    pub fn new(config: VoiceConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            http: HttpClient::new(config.base_url, config.api_key, config.request_timeout)?,
            model: config.model,
        })
    }
}

#[async_trait]
impl ProviderAdapter for VoiceProvider {
    fn name(&self) -> &'static str {
        "voice"
    }

    fn completion_mode(&self) -> CompletionMode {
        CompletionMode::Polling
    }

    async fn submit(&self, spec: &GenerationSpec) -> Result<Submission, ProviderError> {
        let body = json!({
            "custom_mode": true,
            "title": spec.title.clone().unwrap_or_else(|| "Daily Nudge".to_string()),
            "tags": spec.tags.clone().or_else(|| spec.style.clone()).unwrap_or_default(),
            "prompt": spec.prompt,
            "make_instrumental": false,
            "mv": self.model,
        });
        let resp = self.http.post_json("/create", &body).await?;
        let id = parse::first_str(&resp, &[&["data", "id"], &["id"], &["data", "taskId"]])
            .ok_or_else(|| ProviderError::InvalidResponse("no task id in create response".into()))?;
        info!(provider = "voice", task_id = %id, "submitted");
        Ok(Submission::pending(id))
    }

    async fn poll(&self, correlation_id: &str) -> Result<PollStatus, ProviderError> {
        let resp = self.http.get_json("/get", &[("id", correlation_id)]).await?;
        Ok(parse::poll_status(&resp))
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::types::Artifact;

    #[tokio::test]
    async fn submit_then_poll() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/create"))
            .and(body_partial_json(json!({"tags": "voiceover, motivational"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"id": "n-1"}})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/get"))
            .and(query_param("id", "n-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "n-1", "status": "complete", "audio_url": "https://cdn/n-1.mp3"}]
            })))
            .mount(&server)
            .await;

        let p = VoiceProvider::new(VoiceConfig::new("k").with_base_url(server.uri())).unwrap();
        let spec = GenerationSpec::new("say something kind").with_tags("voiceover, motivational");
        let sub = p.submit(&spec).await.unwrap();
        assert_eq!(sub.correlation_id, "n-1");

        assert_eq!(
            p.poll("n-1").await.unwrap(),
            PollStatus::Complete(Artifact::audio("https://cdn/n-1.mp3").with_id("n-1"))
        );
    }

    #[tokio::test]
    async fn payment_required_is_quota() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/create"))
            .respond_with(ResponseTemplate::new(402))
            .mount(&server)
            .await;

        let p = VoiceProvider::new(VoiceConfig::new("k").with_base_url(server.uri())).unwrap();
        let err = p.submit(&GenerationSpec::new("hi there")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Quota(_)));
    }
}
