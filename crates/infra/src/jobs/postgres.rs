//! Postgres-backed job store.
//!
//! ## Atomicity
//!
//! - `claim_pending` is one `UPDATE ... WHERE id = (SELECT ... FOR UPDATE SKIP LOCKED)`
//!   statement, so concurrent workers skip rows another worker is claiming
//!   instead of blocking on them or claiming them twice.
//! - Terminal transitions are conditional updates guarded by
//!   `status IN ('pending', 'in_progress')`; `rows_affected() == 1` tells the
//!   caller it won the race.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | JobStoreError |
//! |------------|----------------------|---------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (check constraint violation) | `23514` | `Storage` |
//! | Database (other) / PoolClosed / Other | any | `Storage` |

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::instrument;
use uuid::Uuid;

use async_trait::async_trait;
use songforge_core::{JobId, UserId};

use super::store::{JobStats, JobStore, JobStoreError};
use super::types::{Job, JobKind, JobStatus, NewJob};

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS generation_jobs (
    id                      UUID PRIMARY KEY,
    user_id                 UUID NOT NULL,
    kind                    TEXT NOT NULL,
    payload                 JSONB NOT NULL,
    status                  TEXT NOT NULL DEFAULT 'pending',
    provider_correlation_id TEXT NULL,
    result                  TEXT NULL,
    error                   TEXT NULL,
    attempts                INTEGER NOT NULL DEFAULT 0,
    created_at              TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at              TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT generation_jobs_status_check
        CHECK (status IN ('pending', 'in_progress', 'succeeded', 'failed'))
);
CREATE INDEX IF NOT EXISTS generation_jobs_pending_idx
    ON generation_jobs (created_at, id) WHERE status = 'pending';
CREATE INDEX IF NOT EXISTS generation_jobs_correlation_idx
    ON generation_jobs (provider_correlation_id) WHERE provider_correlation_id IS NOT NULL;
"#;

const JOB_COLUMNS: &str = "id, user_id, kind, payload, status, provider_correlation_id, result, error, attempts, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the `generation_jobs` table if it does not exist.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), JobStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn finalize(
        &self,
        operation: &str,
        job_id: JobId,
        status: JobStatus,
        result: Option<&str>,
        reason: Option<&str>,
    ) -> Result<bool, JobStoreError> {
        let done = sqlx::query(
            r#"
            UPDATE generation_jobs
            SET status = $2, result = $3, error = $4, updated_at = now()
            WHERE id = $1 AND status IN ('pending', 'in_progress')
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(status.as_str())
        .bind(result)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(operation, e))?;

        if done.rows_affected() == 1 {
            return Ok(true);
        }
        // Distinguish "already terminal" from "no such job".
        match self.get(job_id).await? {
            Some(_) => Ok(false),
            None => Err(JobStoreError::NotFound(job_id)),
        }
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, job), fields(kind = %job.kind, user_id = %job.user_id), err)]
    async fn enqueue(&self, job: NewJob) -> Result<Job, JobStoreError> {
        let sql = format!(
            r#"
            INSERT INTO generation_jobs (id, user_id, kind, payload, status, provider_correlation_id)
            VALUES ($1, $2, $3, $4, 'pending', $5)
            RETURNING {JOB_COLUMNS}
            "#
        );
        let id = JobId::new();
        let row: JobRow = sqlx::query_as(&sql)
            .bind(id.as_uuid())
            .bind(job.user_id.as_uuid())
            .bind(job.kind.as_str())
            .bind(&job.payload)
            .bind(job.provider_correlation_id.as_deref())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("enqueue", e))?;
        row.try_into()
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM generation_jobs WHERE id = $1");
        let row: Option<JobRow> = sqlx::query_as(&sql)
            .bind(job_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;
        row.map(Job::try_from).transpose()
    }

    #[instrument(skip(self), err)]
    async fn claim_pending(&self) -> Result<Option<Job>, JobStoreError> {
        let sql = format!(
            r#"
            UPDATE generation_jobs
            SET status = 'in_progress', attempts = attempts + 1, updated_at = now()
            WHERE id = (
                SELECT id FROM generation_jobs
                WHERE status = 'pending'
                ORDER BY created_at ASC, id ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row: Option<JobRow> = sqlx::query_as(&sql)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("claim_pending", e))?;
        row.map(Job::try_from).transpose()
    }

    #[instrument(skip(self, result), fields(job_id = %job_id), err)]
    async fn mark_succeeded(&self, job_id: JobId, result: &str) -> Result<bool, JobStoreError> {
        self.finalize("mark_succeeded", job_id, JobStatus::Succeeded, Some(result), None)
            .await
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn mark_failed(&self, job_id: JobId, reason: &str) -> Result<bool, JobStoreError> {
        self.finalize("mark_failed", job_id, JobStatus::Failed, None, Some(reason))
            .await
    }

    #[instrument(skip(self), err)]
    async fn find_by_correlation_id(&self, correlation_id: &str) -> Result<Option<Job>, JobStoreError> {
        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS} FROM generation_jobs
            WHERE provider_correlation_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#
        );
        let row: Option<JobRow> = sqlx::query_as(&sql)
            .bind(correlation_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_correlation_id", e))?;
        row.map(Job::try_from).transpose()
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn set_correlation_id(&self, job_id: JobId, correlation_id: &str) -> Result<bool, JobStoreError> {
        let done = sqlx::query(
            r#"
            UPDATE generation_jobs
            SET provider_correlation_id = $2, updated_at = now()
            WHERE id = $1 AND status IN ('pending', 'in_progress')
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(correlation_id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("set_correlation_id", e))?;
        Ok(done.rows_affected() == 1)
    }

    #[instrument(skip(self), err)]
    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM generation_jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("stats", e))?;

        let mut stats = JobStats::default();
        for (status, count) in rows {
            let count = usize::try_from(count).unwrap_or(0);
            match JobStatus::parse(&status) {
                Some(JobStatus::Pending) => stats.pending = count,
                Some(JobStatus::InProgress) => stats.in_progress = count,
                Some(JobStatus::Succeeded) => stats.succeeded = count,
                Some(JobStatus::Failed) => stats.failed = count,
                None => {}
            }
        }
        Ok(stats)
    }
}

#[derive(Debug, FromRow)]
struct JobRow {
    id: Uuid,
    user_id: Uuid,
    kind: String,
    payload: serde_json::Value,
    status: String,
    provider_correlation_id: Option<String>,
    result: Option<String>,
    error: Option<String>,
    attempts: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = JobStoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let kind = JobKind::parse(&row.kind)
            .ok_or_else(|| JobStoreError::Corrupt(format!("unknown job kind '{}' for {}", row.kind, row.id)))?;
        let status = JobStatus::parse(&row.status)
            .ok_or_else(|| JobStoreError::Corrupt(format!("unknown job status '{}' for {}", row.status, row.id)))?;
        Ok(Job {
            id: JobId::from_uuid(row.id),
            user_id: UserId::from_uuid(row.user_id),
            kind,
            payload: row.payload,
            status,
            provider_correlation_id: row.provider_correlation_id,
            result: row.result,
            error: row.error,
            attempts: u32::try_from(row.attempts).unwrap_or(0),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => JobStoreError::Conflict(msg),
                _ => JobStoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            JobStoreError::Storage(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::ColumnDecode { index, source } => {
            JobStoreError::Corrupt(format!("failed to decode column {} in {}: {}", index, operation, source))
        }
        other => JobStoreError::Storage(format!("{} failed: {}", operation, other)),
    }
}
