//! Request/response bodies and mapping from infra types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use songforge_core::{JobId, ResultId, UserId};
use songforge_credits::CreditAccount;
use songforge_infra::jobs::{Job, JobStats};
use songforge_infra::{Accepted, WorkerStatsSnapshot};

/// 202 body for every generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptedResponse {
    pub job_id: JobId,
    pub song_id: ResultId,
    pub correlation_id: Option<String>,
}

impl From<Accepted> for AcceptedResponse {
    fn from(accepted: Accepted) -> Self {
        Self {
            job_id: accepted.job_id,
            song_id: accepted.result_id,
            correlation_id: accepted.correlation_id,
        }
    }
}

/// Polling view of a job. The payload stays internal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResponse {
    pub id: JobId,
    pub kind: String,
    pub status: String,
    pub song_id: Option<ResultId>,
    pub correlation_id: Option<String>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Job> for JobResponse {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            kind: job.kind.as_str().to_string(),
            status: job.status.as_str().to_string(),
            song_id: job.result_id(),
            correlation_id: job.provider_correlation_id.clone(),
            result: job.result.clone(),
            error: job.error.clone(),
            attempts: job.attempts,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditsResponse {
    pub user_id: UserId,
    pub tier: String,
    pub credits_remaining: u32,
    pub weekly_allowance: Option<u32>,
    pub weekly_usage_count: u32,
    pub week_started_at: DateTime<Utc>,
}

impl From<CreditAccount> for CreditsResponse {
    fn from(account: CreditAccount) -> Self {
        Self {
            user_id: account.user_id,
            tier: account.tier.as_str().to_string(),
            credits_remaining: account.credits_remaining,
            weekly_allowance: account.tier.allowance(),
            weekly_usage_count: account.weekly_usage_count,
            week_started_at: account.week_started_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantRequest {
    pub user_id: UserId,
    pub amount: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatsResponse {
    pub worker: WorkerStatsSnapshot,
    pub queue: JobStats,
}
