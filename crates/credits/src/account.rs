//! Credit account aggregate.
//!
//! A reservation is taken before any provider work starts and is either kept
//! (the job succeeded) or handed back with [`CreditAccount::refund`] exactly
//! once. The caller records whether it reserved in the job payload so the
//! refund path never runs twice for the same job.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use songforge_core::UserId;

/// Length of the rolling free-tier usage window, in days.
pub const WEEK_DAYS: i64 = 7;

fn week() -> Duration {
    Duration::days(WEEK_DAYS)
}

/// Quota semantics of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CreditTier {
    /// Subscription: reservations always succeed and never mutate the balance.
    Unlimited,
    /// Prepaid balance in `credits_remaining`.
    Metered,
    /// Free tier: at most `allowance` generations per rolling week.
    FreeWeekly { allowance: u32 },
}

impl CreditTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditTier::Unlimited => "unlimited",
            CreditTier::Metered => "metered",
            CreditTier::FreeWeekly { .. } => "free_weekly",
        }
    }

    /// Rebuild a tier from its stored name (`allowance` applies to the free tier only).
    pub fn parse(name: &str, allowance: u32) -> Result<Self, CreditError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "unlimited" | "pro" => Ok(CreditTier::Unlimited),
            "metered" | "one_time" | "one-time" => Ok(CreditTier::Metered),
            "free_weekly" | "free" => Ok(CreditTier::FreeWeekly { allowance }),
            other => Err(CreditError::UnknownTier(other.to_string())),
        }
    }

    pub fn allowance(&self) -> Option<u32> {
        match self {
            CreditTier::FreeWeekly { allowance } => Some(*allowance),
            _ => None,
        }
    }
}

/// What a successful reservation consumed; refunds reverse the same counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reservation {
    Unlimited,
    Credit,
    WeeklyAllowance,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CreditError {
    #[error("insufficient credits")]
    Insufficient,

    #[error("grant amount must be positive")]
    InvalidAmount,

    #[error("unknown credit tier: {0}")]
    UnknownTier(String),
}

/// Per-user credit state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditAccount {
    pub user_id: UserId,
    pub tier: CreditTier,
    pub credits_remaining: u32,
    pub weekly_usage_count: u32,
    pub week_started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CreditAccount {
    pub fn new(user_id: UserId, tier: CreditTier, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            tier,
            credits_remaining: 0,
            weekly_usage_count: 0,
            week_started_at: now,
            updated_at: now,
        }
    }

    pub fn metered(user_id: UserId, credits: u32, now: DateTime<Utc>) -> Self {
        Self {
            credits_remaining: credits,
            ..Self::new(user_id, CreditTier::Metered, now)
        }
    }

    /// Reset the free-tier counter once the window has fully elapsed.
    ///
    /// Returns `true` when a new window was started.
    pub fn roll_week(&mut self, now: DateTime<Utc>) -> bool {
        if now - self.week_started_at < week() {
            return false;
        }
        self.weekly_usage_count = 0;
        self.week_started_at = now;
        self.updated_at = now;
        true
    }

    /// Whether a reservation would currently succeed.
    pub fn can_reserve(&self, now: DateTime<Utc>) -> bool {
        match self.tier {
            CreditTier::Unlimited => true,
            CreditTier::Metered => self.credits_remaining > 0,
            CreditTier::FreeWeekly { allowance } => {
                now - self.week_started_at >= week() || self.weekly_usage_count < allowance
            }
        }
    }

    /// Take one credit. Leaves the account untouched on failure.
    pub fn try_reserve(&mut self, now: DateTime<Utc>) -> Result<Reservation, CreditError> {
        match self.tier {
            CreditTier::Unlimited => Ok(Reservation::Unlimited),
            CreditTier::Metered => {
                if self.credits_remaining == 0 {
                    return Err(CreditError::Insufficient);
                }
                self.credits_remaining -= 1;
                self.updated_at = now;
                Ok(Reservation::Credit)
            }
            CreditTier::FreeWeekly { .. } => {
                if !self.can_reserve(now) {
                    return Err(CreditError::Insufficient);
                }
                self.roll_week(now);
                self.weekly_usage_count += 1;
                self.updated_at = now;
                Ok(Reservation::WeeklyAllowance)
            }
        }
    }

    /// Hand `amount` reservations back.
    ///
    /// Safe without a matching reservation: the free-tier counter saturates at
    /// zero and the metered balance saturates at `u32::MAX`.
    pub fn refund(&mut self, amount: u32, now: DateTime<Utc>) {
        match self.tier {
            CreditTier::Unlimited => return,
            CreditTier::Metered => {
                self.credits_remaining = self.credits_remaining.saturating_add(amount);
            }
            CreditTier::FreeWeekly { .. } => {
                self.weekly_usage_count = self.weekly_usage_count.saturating_sub(amount);
            }
        }
        self.updated_at = now;
    }

    /// Administrative top-up after a confirmed purchase.
    ///
    /// A free account that buys credits becomes metered. Unlimited accounts
    /// keep their tier; the balance is still recorded.
    pub fn grant(&mut self, amount: u32, now: DateTime<Utc>) -> Result<(), CreditError> {
        if amount == 0 {
            return Err(CreditError::InvalidAmount);
        }
        if matches!(self.tier, CreditTier::FreeWeekly { .. }) {
            self.tier = CreditTier::Metered;
        }
        self.credits_remaining = self.credits_remaining.saturating_add(amount);
        self.updated_at = now;
        Ok(())
    }
}
