//! Postgres-backed credit ledger.
//!
//! Every mutation is a single conditional `UPDATE` on `credit_accounts`, so
//! the row lock taken by Postgres serializes concurrent reservations for the
//! same user. `reserve` succeeds iff exactly one row was updated.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | LedgerError |
//! |------------|----------------------|-------------|
//! | Database (check violation on balance) | `23514` | `Credit(Insufficient)` |
//! | Database (other) / PoolClosed / Other | any | `Storage` |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::{debug, instrument};
use uuid::Uuid;

use songforge_core::UserId;
use songforge_credits::{CreditAccount, CreditError, CreditTier, WEEK_DAYS};

use super::{CreditLedger, LedgerError};

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS credit_accounts (
    user_id            UUID PRIMARY KEY,
    tier               TEXT NOT NULL,
    weekly_allowance   INTEGER NOT NULL DEFAULT 0,
    credits_remaining  INTEGER NOT NULL DEFAULT 0,
    weekly_usage_count INTEGER NOT NULL DEFAULT 0,
    week_started_at    TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at         TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT credit_accounts_balance_check CHECK (credits_remaining >= 0),
    CONSTRAINT credit_accounts_usage_check CHECK (weekly_usage_count >= 0)
);
"#;

const ACCOUNT_COLUMNS: &str =
    "user_id, tier, weekly_allowance, credits_remaining, weekly_usage_count, week_started_at, updated_at";

#[derive(Debug, Clone)]
pub struct PostgresCreditLedger {
    pool: PgPool,
    default_tier: CreditTier,
}

impl PostgresCreditLedger {
    pub fn new(pool: PgPool, default_tier: CreditTier) -> Self {
        Self { pool, default_tier }
    }

    /// Create the `credit_accounts` table if it does not exist.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), LedgerError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    /// Insert a default-tier account unless one exists.
    async fn ensure_account(&self, user_id: UserId) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO credit_accounts (user_id, tier, weekly_allowance)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(self.default_tier.as_str())
        .bind(to_db_int(self.default_tier.allowance().unwrap_or(0)))
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("ensure_account", e))?;
        Ok(())
    }
}

#[async_trait]
impl CreditLedger for PostgresCreditLedger {
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn reserve(&self, user_id: UserId) -> Result<bool, LedgerError> {
        self.ensure_account(user_id).await?;

        // One statement: roll an expired free window, then take from whichever
        // counter the tier uses. The WHERE clause is the availability check.
        let sql = format!(
            r#"
            UPDATE credit_accounts
            SET
                weekly_usage_count = CASE
                    WHEN tier <> 'free_weekly' THEN weekly_usage_count
                    WHEN week_started_at <= now() - interval '{WEEK_DAYS} days' THEN 1
                    ELSE weekly_usage_count + 1
                END,
                week_started_at = CASE
                    WHEN tier = 'free_weekly' AND week_started_at <= now() - interval '{WEEK_DAYS} days' THEN now()
                    ELSE week_started_at
                END,
                credits_remaining = CASE
                    WHEN tier = 'metered' THEN credits_remaining - 1
                    ELSE credits_remaining
                END,
                updated_at = now()
            WHERE user_id = $1
              AND (
                    tier = 'unlimited'
                 OR (tier = 'metered' AND credits_remaining > 0)
                 OR (tier = 'free_weekly' AND (
                        week_started_at <= now() - interval '{WEEK_DAYS} days'
                     OR weekly_usage_count < weekly_allowance))
              )
            "#
        );
        let done = sqlx::query(&sql)
            .bind(user_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("reserve", e))?;

        let reserved = done.rows_affected() == 1;
        debug!(reserved, "credit reservation attempted");
        Ok(reserved)
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn refund(&self, user_id: UserId, amount: u32) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            UPDATE credit_accounts
            SET
                credits_remaining = CASE
                    WHEN tier = 'metered' THEN credits_remaining + $2
                    ELSE credits_remaining
                END,
                weekly_usage_count = CASE
                    WHEN tier = 'free_weekly' THEN GREATEST(weekly_usage_count - $2, 0)
                    ELSE weekly_usage_count
                END,
                updated_at = now()
            WHERE user_id = $1 AND tier <> 'unlimited'
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(to_db_int(amount))
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("refund", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn grant(&self, user_id: UserId, amount: u32) -> Result<bool, LedgerError> {
        if amount == 0 {
            return Ok(false);
        }
        self.ensure_account(user_id).await?;
        let done = sqlx::query(
            r#"
            UPDATE credit_accounts
            SET
                tier = CASE WHEN tier = 'free_weekly' THEN 'metered' ELSE tier END,
                credits_remaining = credits_remaining + $2,
                updated_at = now()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(to_db_int(amount))
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("grant", e))?;
        Ok(done.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn account(&self, user_id: UserId) -> Result<CreditAccount, LedgerError> {
        self.ensure_account(user_id).await?;
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM credit_accounts WHERE user_id = $1");
        let row: AccountRow = sqlx::query_as(&sql)
            .bind(user_id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("account", e))?;

        let mut account = CreditAccount::try_from(row)?;
        account.roll_week(Utc::now());
        Ok(account)
    }
}

#[derive(Debug, FromRow)]
struct AccountRow {
    user_id: Uuid,
    tier: String,
    weekly_allowance: i32,
    credits_remaining: i32,
    weekly_usage_count: i32,
    week_started_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for CreditAccount {
    type Error = LedgerError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        let tier = CreditTier::parse(&row.tier, from_db_int(row.weekly_allowance))?;
        Ok(CreditAccount {
            user_id: UserId::from_uuid(row.user_id),
            tier,
            credits_remaining: from_db_int(row.credits_remaining),
            weekly_usage_count: from_db_int(row.weekly_usage_count),
            week_started_at: row.week_started_at,
            updated_at: row.updated_at,
        })
    }
}

fn to_db_int(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn from_db_int(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            Some("23514") => LedgerError::Credit(CreditError::Insufficient),
            _ => LedgerError::Storage(format!("database error in {}: {}", operation, db_err.message())),
        },
        sqlx::Error::PoolClosed => LedgerError::Storage(format!("connection pool closed in {}", operation)),
        other => LedgerError::Storage(format!("{} failed: {}", operation, other)),
    }
}
