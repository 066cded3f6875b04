//! Postgres-backed result sink (`songs` table).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::instrument;
use uuid::Uuid;

use songforge_core::{ResultId, UserId};

use super::{ArtifactSet, NewResult, ResultRecord, ResultSink, ResultSinkError};

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS songs (
    id            UUID PRIMARY KEY,
    user_id       UUID NOT NULL,
    title         TEXT NULL,
    prompt        TEXT NOT NULL,
    style         TEXT NULL,
    preview_url   TEXT NULL,
    full_url      TEXT NULL,
    duration_secs INTEGER NULL,
    lyrics        TEXT NULL,
    unlocked      BOOLEAN NOT NULL DEFAULT false,
    created_at    TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at    TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS songs_user_idx ON songs (user_id, created_at DESC);
"#;

const SONG_COLUMNS: &str =
    "id, user_id, title, prompt, style, preview_url, full_url, duration_secs, lyrics, unlocked, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PostgresResultSink {
    pool: PgPool,
}

impl PostgresResultSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), ResultSinkError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }
}

#[async_trait]
impl ResultSink for PostgresResultSink {
    #[instrument(skip(self, new), fields(user_id = %new.user_id), err)]
    async fn create_pending(&self, new: NewResult) -> Result<ResultRecord, ResultSinkError> {
        let sql = format!(
            r#"
            INSERT INTO songs (id, user_id, title, prompt, style)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {SONG_COLUMNS}
            "#
        );
        let id = ResultId::new();
        let row: SongRow = sqlx::query_as(&sql)
            .bind(id.as_uuid())
            .bind(new.user_id.as_uuid())
            .bind(new.title.as_deref())
            .bind(&new.prompt)
            .bind(new.style.as_deref())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_pending", e))?;
        Ok(row.into())
    }

    #[instrument(skip(self, artifacts), fields(result_id = %id), err)]
    async fn set_artifacts(&self, id: ResultId, artifacts: &ArtifactSet) -> Result<bool, ResultSinkError> {
        let done = sqlx::query(
            r#"
            UPDATE songs
            SET preview_url = COALESCE($2, preview_url),
                full_url = COALESCE($3, full_url),
                duration_secs = COALESCE($4, duration_secs),
                lyrics = COALESCE($5, lyrics),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(artifacts.preview_url.as_deref())
        .bind(artifacts.full_url.as_deref())
        .bind(artifacts.duration_secs.map(|d| i32::try_from(d).unwrap_or(i32::MAX)))
        .bind(artifacts.text.as_deref())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("set_artifacts", e))?;
        Ok(done.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(result_id = %id), err)]
    async fn get(&self, id: ResultId) -> Result<Option<ResultRecord>, ResultSinkError> {
        let sql = format!("SELECT {SONG_COLUMNS} FROM songs WHERE id = $1");
        let row: Option<SongRow> = sqlx::query_as(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;
        Ok(row.map(ResultRecord::from))
    }
}

#[derive(Debug, FromRow)]
struct SongRow {
    id: Uuid,
    user_id: Uuid,
    title: Option<String>,
    prompt: String,
    style: Option<String>,
    preview_url: Option<String>,
    full_url: Option<String>,
    duration_secs: Option<i32>,
    lyrics: Option<String>,
    unlocked: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<SongRow> for ResultRecord {
    fn from(row: SongRow) -> Self {
        ResultRecord {
            id: ResultId::from_uuid(row.id),
            user_id: UserId::from_uuid(row.user_id),
            title: row.title,
            prompt: row.prompt,
            style: row.style,
            preview_url: row.preview_url,
            full_url: row.full_url,
            duration_secs: row.duration_secs.and_then(|d| u32::try_from(d).ok()),
            text: row.lyrics,
            unlocked: row.unlocked,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> ResultSinkError {
    match err {
        sqlx::Error::Database(db_err) => {
            ResultSinkError::Storage(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed => ResultSinkError::Storage(format!("connection pool closed in {}", operation)),
        other => ResultSinkError::Storage(format!("{} failed: {}", operation, other)),
    }
}
