//! Postgres pool and schema wiring.

use std::sync::Arc;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use songforge_credits::CreditTier;

use crate::jobs::PostgresJobStore;
use crate::ledger::PostgresCreditLedger;
use crate::pipeline::Stores;
use crate::results::PostgresResultSink;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("failed to connect to postgres: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("schema setup failed: {0}")]
    Migrate(String),
}

pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, DbError> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(DbError::Connect)
}

/// Create every table, then return Postgres-backed stores sharing `pool`.
pub async fn postgres_stores(pool: PgPool, default_tier: CreditTier) -> Result<Stores, DbError> {
    let jobs = PostgresJobStore::new(pool.clone());
    let ledger = PostgresCreditLedger::new(pool.clone(), default_tier);
    let results = PostgresResultSink::new(pool);

    jobs.migrate().await.map_err(|e| DbError::Migrate(e.to_string()))?;
    ledger.migrate().await.map_err(|e| DbError::Migrate(e.to_string()))?;
    results.migrate().await.map_err(|e| DbError::Migrate(e.to_string()))?;
    info!("postgres schema ready");

    Ok(Stores::new(Arc::new(jobs), Arc::new(ledger), Arc::new(results)))
}
