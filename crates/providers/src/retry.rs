//! Bounded polling policy and an injectable sleep strategy.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

/// Delay growth between poll attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffStrategy {
    /// Same delay before every attempt.
    #[default]
    Fixed,
    /// base * 2^(attempt - 1), capped at `max_delay`.
    Exponential,
    /// base * attempt, capped at `max_delay`.
    Linear,
}

/// How often and how long to poll a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    /// Attempts before giving up with a timeout.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for PollPolicy {
    /// 60 attempts, 3 s apart.
    fn default() -> Self {
        Self::fixed(60, Duration::from_secs(3))
    }
}

impl PollPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay to wait before the given attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let delay = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Exponential => {
                let factor = 2u32.saturating_pow(attempt - 1);
                self.base_delay.saturating_mul(factor)
            }
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt),
        };
        delay.min(self.max_delay.max(self.base_delay))
    }

    pub fn has_attempts_left(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Non-blocking sleep, injectable so tests never wait on the wall clock.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[async_trait]
impl<S> Sleeper for Arc<S>
where
    S: Sleeper + ?Sized,
{
    async fn sleep(&self, duration: Duration) {
        (**self).sleep(duration).await
    }
}

/// Real timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Returns immediately and records what it was asked to sleep.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Duration> {
        self.slept.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn total(&self) -> Duration {
        self.calls().into_iter().sum()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut slept) = self.slept.lock() {
            slept.push(duration);
        }
        // Let other tasks run so loops built on this sleeper stay cooperative.
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_delay_is_constant() {
        let p = PollPolicy::fixed(3, Duration::from_secs(3));
        assert_eq!(p.delay_for_attempt(1), Duration::from_secs(3));
        assert_eq!(p.delay_for_attempt(50), Duration::from_secs(3));
        assert_eq!(p.delay_for_attempt(0), Duration::ZERO);
    }

    #[test]
    fn exponential_delay_is_capped() {
        let p = PollPolicy::exponential(10, Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(p.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(p.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(p.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(p.delay_for_attempt(8), Duration::from_secs(1));
        assert_eq!(p.delay_for_attempt(40), Duration::from_secs(1));
    }

    #[test]
    fn attempt_budget() {
        let p = PollPolicy::fixed(2, Duration::ZERO);
        assert!(p.has_attempts_left(1));
        assert!(!p.has_attempts_left(2));
    }

    #[tokio::test]
    async fn recording_sleeper_does_not_wait() {
        let s = RecordingSleeper::new();
        s.sleep(Duration::from_secs(3600)).await;
        s.sleep(Duration::from_secs(1)).await;
        assert_eq!(s.calls().len(), 2);
        assert_eq!(s.total(), Duration::from_secs(3601));
    }
}
