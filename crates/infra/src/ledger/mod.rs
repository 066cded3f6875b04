//! Credit ledger: atomic reserve / refund / grant per user.

pub mod postgres;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use songforge_core::UserId;
use songforge_credits::{CreditAccount, CreditError, CreditTier};

pub use postgres::PostgresCreditLedger;

/// Per-user credit counter.
///
/// Each operation is a single atomic read-modify-write on one account, so two
/// concurrent reservations against one remaining credit cannot both succeed.
/// Accounts that do not exist yet are created with the ledger's default tier.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Take one credit. `false` means insufficient credit; nothing was changed.
    async fn reserve(&self, user_id: UserId) -> Result<bool, LedgerError>;

    /// Give back `amount` reservations. Callers guarantee at most one refund per job.
    async fn refund(&self, user_id: UserId, amount: u32) -> Result<(), LedgerError>;

    /// Administrative top-up. `false` when `amount` is zero.
    async fn grant(&self, user_id: UserId, amount: u32) -> Result<bool, LedgerError>;

    async fn account(&self, user_id: UserId) -> Result<CreditAccount, LedgerError>;
}

#[async_trait]
impl<L> CreditLedger for Arc<L>
where
    L: CreditLedger + ?Sized,
{
    async fn reserve(&self, user_id: UserId) -> Result<bool, LedgerError> {
        (**self).reserve(user_id).await
    }

    async fn refund(&self, user_id: UserId, amount: u32) -> Result<(), LedgerError> {
        (**self).refund(user_id, amount).await
    }

    async fn grant(&self, user_id: UserId, amount: u32) -> Result<bool, LedgerError> {
        (**self).grant(user_id, amount).await
    }

    async fn account(&self, user_id: UserId) -> Result<CreditAccount, LedgerError> {
        (**self).account(user_id).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error(transparent)]
    Credit(#[from] CreditError),
    #[error("ledger storage error: {0}")]
    Storage(String),
}

/// In-memory ledger for tests/dev.
#[derive(Debug)]
pub struct InMemoryCreditLedger {
    accounts: Mutex<HashMap<UserId, CreditAccount>>,
    default_tier: CreditTier,
}

impl Default for InMemoryCreditLedger {
    fn default() -> Self {
        Self::new(CreditTier::FreeWeekly { allowance: 1 })
    }
}

impl InMemoryCreditLedger {
    pub fn new(default_tier: CreditTier) -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            default_tier,
        }
    }

    /// Seed or replace an account.
    pub fn insert(&self, account: CreditAccount) {
        if let Ok(mut accounts) = self.accounts.lock() {
            accounts.insert(account.user_id, account);
        }
    }

    pub fn with_account(self, account: CreditAccount) -> Self {
        self.insert(account);
        self
    }

    /// Apply `f` to the (possibly new) account under the lock.
    fn with_account_mut<T>(
        &self,
        user_id: UserId,
        f: impl FnOnce(&mut CreditAccount) -> T,
    ) -> Result<T, LedgerError> {
        let mut accounts = self
            .accounts
            .lock()
            .map_err(|_| LedgerError::Storage("ledger lock poisoned".into()))?;
        let account = accounts
            .entry(user_id)
            .or_insert_with(|| CreditAccount::new(user_id, self.default_tier, Utc::now()));
        Ok(f(account))
    }
}

#[async_trait]
impl CreditLedger for InMemoryCreditLedger {
    async fn reserve(&self, user_id: UserId) -> Result<bool, LedgerError> {
        let reserved = self.with_account_mut(user_id, |acct| acct.try_reserve(Utc::now()))?;
        match reserved {
            Ok(kind) => {
                debug!(user_id = %user_id, reservation = ?kind, "credit reserved");
                Ok(true)
            }
            Err(CreditError::Insufficient) => Ok(false),
            Err(other) => Err(other.into()),
        }
    }

    async fn refund(&self, user_id: UserId, amount: u32) -> Result<(), LedgerError> {
        self.with_account_mut(user_id, |acct| acct.refund(amount, Utc::now()))?;
        debug!(user_id = %user_id, amount, "credit refunded");
        Ok(())
    }

    async fn grant(&self, user_id: UserId, amount: u32) -> Result<bool, LedgerError> {
        match self.with_account_mut(user_id, |acct| acct.grant(amount, Utc::now()))? {
            Ok(()) => Ok(true),
            Err(CreditError::InvalidAmount) => Ok(false),
            Err(other) => Err(other.into()),
        }
    }

    async fn account(&self, user_id: UserId) -> Result<CreditAccount, LedgerError> {
        self.with_account_mut(user_id, |acct| {
            acct.roll_week(Utc::now());
            acct.clone()
        })
    }
}
