//! Adapter traits over generation backends.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::types::{Artifact, CompletionMode, GenerationSpec, PollStatus, Submission};

/// Uniform interface over a generation backend.
///
/// Every adapter can be polled. Callback-capable adapters additionally notify
/// `spec.callback_url` when one is given; polling stays available as the
/// fallback path.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn completion_mode(&self) -> CompletionMode;

    async fn submit(&self, spec: &GenerationSpec) -> Result<Submission, ProviderError>;

    async fn poll(&self, correlation_id: &str) -> Result<PollStatus, ProviderError>;
}

/// Secondary asynchronous step that turns a primary artifact into a richer
/// format (audio into a muxed video).
#[async_trait]
pub trait PackagingAdapter: Send + Sync {
    /// Start packaging; returns the packaging task id.
    async fn submit_packaging(
        &self,
        correlation_id: &str,
        primary: &Artifact,
        callback_url: Option<&str>,
    ) -> Result<String, ProviderError>;

    async fn poll_packaging(&self, packaging_id: &str) -> Result<PollStatus, ProviderError>;
}

#[async_trait]
impl<P> ProviderAdapter for Arc<P>
where
    P: ProviderAdapter + ?Sized,
{
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn completion_mode(&self) -> CompletionMode {
        (**self).completion_mode()
    }

    async fn submit(&self, spec: &GenerationSpec) -> Result<Submission, ProviderError> {
        (**self).submit(spec).await
    }

    async fn poll(&self, correlation_id: &str) -> Result<PollStatus, ProviderError> {
        (**self).poll(correlation_id).await
    }
}

#[async_trait]
impl<P> PackagingAdapter for Arc<P>
where
    P: PackagingAdapter + ?Sized,
{
    async fn submit_packaging(
        &self,
        correlation_id: &str,
        primary: &Artifact,
        callback_url: Option<&str>,
    ) -> Result<String, ProviderError> {
        (**self).submit_packaging(correlation_id, primary, callback_url).await
    }

    async fn poll_packaging(&self, packaging_id: &str) -> Result<PollStatus, ProviderError> {
        (**self).poll_packaging(packaging_id).await
    }
}
