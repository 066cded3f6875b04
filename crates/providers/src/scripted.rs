//! Deterministic in-process provider for tests and local runs.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::adapter::{PackagingAdapter, ProviderAdapter};
use crate::error::ProviderError;
use crate::types::{Artifact, CompletionMode, GenerationSpec, PollStatus, Submission};

/// Answer returned once the poll script is exhausted.
#[derive(Debug, Clone)]
enum Fallback {
    Pending,
    Status(PollStatus),
    Error(ProviderError),
}

/// Provider whose answers are scripted up front.
///
/// Submissions get correlation ids `scripted-1`, `scripted-2`, ... unless a
/// fixed id was configured. Poll answers are consumed in order; once the
/// script is empty every poll returns the fallback (pending by default).
#[derive(Debug)]
pub struct ScriptedProvider {
    mode: CompletionMode,
    fixed_id: Option<String>,
    submit_error: Mutex<Option<ProviderError>>,
    immediate: Option<Artifact>,
    polls: Mutex<VecDeque<Result<PollStatus, ProviderError>>>,
    fallback: Fallback,
    packaging: Mutex<VecDeque<Result<PollStatus, ProviderError>>>,
    packaging_fallback: Fallback,
    seq: AtomicU32,
    submit_calls: AtomicUsize,
    poll_calls: AtomicUsize,
    packaging_calls: AtomicUsize,
    last_spec: Mutex<Option<GenerationSpec>>,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self {
            mode: CompletionMode::Polling,
            fixed_id: None,
            submit_error: Mutex::new(None),
            immediate: None,
            polls: Mutex::new(VecDeque::new()),
            fallback: Fallback::Pending,
            packaging: Mutex::new(VecDeque::new()),
            packaging_fallback: Fallback::Pending,
            seq: AtomicU32::new(0),
            submit_calls: AtomicUsize::new(0),
            poll_calls: AtomicUsize::new(0),
            packaging_calls: AtomicUsize::new(0),
            last_spec: Mutex::new(None),
        }
    }
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider that completes on the first poll.
    pub fn completing(artifact: Artifact) -> Self {
        Self::new().then_poll(PollStatus::Complete(artifact))
    }

    pub fn with_mode(mut self, mode: CompletionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.fixed_id = Some(id.into());
        self
    }

    pub fn with_immediate(mut self, artifact: Artifact) -> Self {
        self.immediate = Some(artifact);
        self
    }

    /// Fail the next submit with `err`.
    pub fn failing_submit(self, err: ProviderError) -> Self {
        if let Ok(mut slot) = self.submit_error.lock() {
            *slot = Some(err);
        }
        self
    }

    pub fn then_poll(self, status: PollStatus) -> Self {
        if let Ok(mut q) = self.polls.lock() {
            q.push_back(Ok(status));
        }
        self
    }

    pub fn then_poll_error(self, err: ProviderError) -> Self {
        if let Ok(mut q) = self.polls.lock() {
            q.push_back(Err(err));
        }
        self
    }

    /// Answer every unscripted poll with `status` instead of pending.
    pub fn always(mut self, status: PollStatus) -> Self {
        self.fallback = Fallback::Status(status);
        self
    }

    pub fn always_error(mut self, err: ProviderError) -> Self {
        self.fallback = Fallback::Error(err);
        self
    }

    pub fn then_packaging(self, status: PollStatus) -> Self {
        if let Ok(mut q) = self.packaging.lock() {
            q.push_back(Ok(status));
        }
        self
    }

    pub fn packaging_always(mut self, status: PollStatus) -> Self {
        self.packaging_fallback = Fallback::Status(status);
        self
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub fn packaging_calls(&self) -> usize {
        self.packaging_calls.load(Ordering::SeqCst)
    }

    pub fn last_spec(&self) -> Option<GenerationSpec> {
        self.last_spec.lock().ok().and_then(|s| s.clone())
    }

    fn next(queue: &Mutex<VecDeque<Result<PollStatus, ProviderError>>>, fallback: &Fallback) -> Result<PollStatus, ProviderError> {
        let scripted = queue.lock().ok().and_then(|mut q| q.pop_front());
        match scripted {
            Some(answer) => answer,
            None => match fallback {
                Fallback::Pending => Ok(PollStatus::Pending),
                Fallback::Status(s) => Ok(s.clone()),
                Fallback::Error(e) => Err(e.clone()),
            },
        }
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn completion_mode(&self) -> CompletionMode {
        self.mode
    }

    async fn submit(&self, spec: &GenerationSpec) -> Result<Submission, ProviderError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_spec.lock() {
            *last = Some(spec.clone());
        }
        if let Some(err) = self.submit_error.lock().ok().and_then(|mut e| e.take()) {
            return Err(err);
        }
        let correlation_id = match &self.fixed_id {
            Some(id) => id.clone(),
            None => format!("scripted-{}", self.seq.fetch_add(1, Ordering::SeqCst) + 1),
        };
        Ok(Submission {
            correlation_id,
            immediate: self.immediate.clone(),
        })
    }

    async fn poll(&self, _correlation_id: &str) -> Result<PollStatus, ProviderError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        Self::next(&self.polls, &self.fallback)
    }
}

#[async_trait]
impl PackagingAdapter for ScriptedProvider {
    async fn submit_packaging(
        &self,
        correlation_id: &str,
        _primary: &Artifact,
        _callback_url: Option<&str>,
    ) -> Result<String, ProviderError> {
        self.packaging_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{correlation_id}-mp4"))
    }

    async fn poll_packaging(&self, _packaging_id: &str) -> Result<PollStatus, ProviderError> {
        Self::next(&self.packaging, &self.packaging_fallback)
    }
}
