//! Provider used when no real backend is configured.

use async_trait::async_trait;
use uuid::Uuid;

use crate::adapter::{PackagingAdapter, ProviderAdapter};
use crate::error::ProviderError;
use crate::types::{Artifact, CompletionMode, GenerationSpec, PollStatus, Submission};

pub const SAMPLE_PREVIEW_URL: &str = "/audio/sample-preview.mp3";

/// Completes every request immediately with a bundled sample track.
#[derive(Debug, Clone)]
pub struct PlaceholderProvider {
    sample_url: String,
}

impl Default for PlaceholderProvider {
    fn default() -> Self {
        Self::new(SAMPLE_PREVIEW_URL)
    }
}

impl PlaceholderProvider {
    pub fn new(sample_url: impl Into<String>) -> Self {
        Self {
            sample_url: sample_url.into(),
        }
    }

    fn sample(&self) -> Artifact {
        Artifact::audio(self.sample_url.clone())
    }
}

#[async_trait]
impl ProviderAdapter for PlaceholderProvider {
    fn name(&self) -> &'static str {
        "placeholder"
    }

    fn completion_mode(&self) -> CompletionMode {
        CompletionMode::Polling
    }

    async fn submit(&self, _spec: &GenerationSpec) -> Result<Submission, ProviderError> {
        Ok(Submission {
            correlation_id: format!("placeholder-{}", Uuid::now_v7()),
            immediate: Some(self.sample()),
        })
    }

    async fn poll(&self, _correlation_id: &str) -> Result<PollStatus, ProviderError> {
        Ok(PollStatus::Complete(self.sample()))
    }
}

/// Packaging is not available without a real backend.
#[async_trait]
impl PackagingAdapter for PlaceholderProvider {
    async fn submit_packaging(
        &self,
        _correlation_id: &str,
        _primary: &Artifact,
        _callback_url: Option<&str>,
    ) -> Result<String, ProviderError> {
        Err(ProviderError::rejected("packaging not supported by placeholder provider"))
    }

    async fn poll_packaging(&self, _packaging_id: &str) -> Result<PollStatus, ProviderError> {
        Ok(PollStatus::Error("packaging not supported by placeholder provider".into()))
    }
}
