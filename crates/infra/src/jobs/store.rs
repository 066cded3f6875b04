//! Job storage abstraction and the in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use songforge_core::JobId;

use super::types::{Job, JobStatus, NewJob};

/// Durable queue of generation jobs.
///
/// Terminal transitions are compare-and-swap: they only apply while the job
/// is non-terminal and report whether this call performed the transition.
/// Whichever finalizer gets there first wins; the other sees `false`.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a `pending` job.
    async fn enqueue(&self, job: NewJob) -> Result<Job, JobStoreError>;

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Atomically move the oldest `pending` job to `in_progress` and return it.
    ///
    /// Concurrent claimers never receive the same job.
    async fn claim_pending(&self) -> Result<Option<Job>, JobStoreError>;

    /// `pending | in_progress -> succeeded`. Returns `false` if already terminal.
    async fn mark_succeeded(&self, job_id: JobId, result: &str) -> Result<bool, JobStoreError>;

    /// `pending | in_progress -> failed`. Returns `false` if already terminal.
    async fn mark_failed(&self, job_id: JobId, reason: &str) -> Result<bool, JobStoreError>;

    /// Most recent job carrying this provider correlation id.
    async fn find_by_correlation_id(&self, correlation_id: &str) -> Result<Option<Job>, JobStoreError>;

    /// Record the correlation id obtained after submission.
    ///
    /// Returns `false` if the job is already terminal.
    async fn set_correlation_id(&self, job_id: JobId, correlation_id: &str) -> Result<bool, JobStoreError>;

    async fn stats(&self) -> Result<JobStats, JobStoreError>;
}

#[async_trait]
impl<S> JobStore for Arc<S>
where
    S: JobStore + ?Sized,
{
    async fn enqueue(&self, job: NewJob) -> Result<Job, JobStoreError> {
        (**self).enqueue(job).await
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        (**self).get(job_id).await
    }

    async fn claim_pending(&self) -> Result<Option<Job>, JobStoreError> {
        (**self).claim_pending().await
    }

    async fn mark_succeeded(&self, job_id: JobId, result: &str) -> Result<bool, JobStoreError> {
        (**self).mark_succeeded(job_id, result).await
    }

    async fn mark_failed(&self, job_id: JobId, reason: &str) -> Result<bool, JobStoreError> {
        (**self).mark_failed(job_id, reason).await
    }

    async fn find_by_correlation_id(&self, correlation_id: &str) -> Result<Option<Job>, JobStoreError> {
        (**self).find_by_correlation_id(correlation_id).await
    }

    async fn set_correlation_id(&self, job_id: JobId, correlation_id: &str) -> Result<bool, JobStoreError> {
        (**self).set_correlation_id(job_id, correlation_id).await
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        (**self).stats().await
    }
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("corrupt job row: {0}")]
    Corrupt(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Job counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub in_progress: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn poisoned() -> JobStoreError {
        JobStoreError::Storage("job store lock poisoned".into())
    }

    fn finalize(&self, job_id: JobId, status: JobStatus, result: Option<&str>, reason: Option<&str>) -> Result<bool, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| Self::poisoned())?;
        let job = jobs.get_mut(&job_id).ok_or(JobStoreError::NotFound(job_id))?;
        if job.status.is_terminal() {
            return Ok(false);
        }
        job.status = status;
        job.result = result.map(str::to_string);
        job.error = reason.map(str::to_string);
        job.updated_at = Utc::now();
        Ok(true)
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn enqueue(&self, new: NewJob) -> Result<Job, JobStoreError> {
        let now = Utc::now();
        let job = Job {
            id: JobId::new(),
            user_id: new.user_id,
            kind: new.kind,
            payload: new.payload,
            status: JobStatus::Pending,
            provider_correlation_id: new.provider_correlation_id,
            result: None,
            error: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
        };
        let mut jobs = self.jobs.write().map_err(|_| Self::poisoned())?;
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::Conflict(format!("job {} already exists", job.id)));
        }
        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        let jobs = self.jobs.read().map_err(|_| Self::poisoned())?;
        Ok(jobs.get(&job_id).cloned())
    }

    async fn claim_pending(&self) -> Result<Option<Job>, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| Self::poisoned())?;

        // Oldest first; ids are time-ordered and break ties.
        let next = jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .min_by_key(|j| (j.created_at, j.id))
            .map(|j| j.id);

        Ok(next.and_then(|id| {
            jobs.get_mut(&id).map(|job| {
                job.status = JobStatus::InProgress;
                job.attempts += 1;
                job.updated_at = Utc::now();
                job.clone()
            })
        }))
    }

    async fn mark_succeeded(&self, job_id: JobId, result: &str) -> Result<bool, JobStoreError> {
        self.finalize(job_id, JobStatus::Succeeded, Some(result), None)
    }

    async fn mark_failed(&self, job_id: JobId, reason: &str) -> Result<bool, JobStoreError> {
        self.finalize(job_id, JobStatus::Failed, None, Some(reason))
    }

    async fn find_by_correlation_id(&self, correlation_id: &str) -> Result<Option<Job>, JobStoreError> {
        let jobs = self.jobs.read().map_err(|_| Self::poisoned())?;
        Ok(jobs
            .values()
            .filter(|j| j.provider_correlation_id.as_deref() == Some(correlation_id))
            .max_by_key(|j| (j.created_at, j.id))
            .cloned())
    }

    async fn set_correlation_id(&self, job_id: JobId, correlation_id: &str) -> Result<bool, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| Self::poisoned())?;
        let job = jobs.get_mut(&job_id).ok_or(JobStoreError::NotFound(job_id))?;
        if job.status.is_terminal() {
            return Ok(false);
        }
        job.provider_correlation_id = Some(correlation_id.to_string());
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let jobs = self.jobs.read().map_err(|_| Self::poisoned())?;
        let mut stats = JobStats::default();
        for job in jobs.values() {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::InProgress => stats.in_progress += 1,
                JobStatus::Succeeded => stats.succeeded += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}
