//! Drives a provider's poll endpoint under a [`PollPolicy`].

use std::future::Future;

use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::retry::{PollPolicy, Sleeper};
use crate::types::{Artifact, PollStatus};

/// Terminal result of a polling run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Complete(Artifact),
    /// Someone else finalized the job while we were waiting; stop quietly.
    Abandoned { attempts: u32 },
}

/// Attempt counter plus delay policy over an injected sleeper.
#[derive(Debug, Clone)]
pub struct Poller<S> {
    policy: PollPolicy,
    sleeper: S,
}

impl<S: Sleeper> Poller<S> {
    pub fn new(policy: PollPolicy, sleeper: S) -> Self {
        Self { policy, sleeper }
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Poll until the provider completes, errors, or the attempt budget runs out.
    ///
    /// Before each attempt the poller sleeps, then asks `still_wanted`; a
    /// `false` answer ends the run with [`PollOutcome::Abandoned`]. Retryable
    /// request errors consume an attempt and polling continues; any other
    /// error ends the run. Exhausting the budget yields
    /// [`ProviderError::Timeout`].
    pub async fn run<P, PF, W, WF>(
        &self,
        label: &str,
        mut poll: P,
        mut still_wanted: W,
    ) -> Result<PollOutcome, ProviderError>
    where
        P: FnMut() -> PF,
        PF: Future<Output = Result<PollStatus, ProviderError>>,
        W: FnMut() -> WF,
        WF: Future<Output = bool>,
    {
        let max = self.policy.max_attempts;
        for attempt in 1..=max {
            self.sleeper.sleep(self.policy.delay_for_attempt(attempt)).await;

            if !still_wanted().await {
                debug!(label, attempt, "polling abandoned; already finalized");
                return Ok(PollOutcome::Abandoned { attempts: attempt });
            }

            match poll().await {
                Ok(PollStatus::Complete(artifact)) => {
                    debug!(label, attempt, "poll complete");
                    return Ok(PollOutcome::Complete(artifact));
                }
                Ok(PollStatus::Error(reason)) => {
                    return Err(ProviderError::Generation(reason));
                }
                Ok(PollStatus::Pending) => {
                    debug!(label, attempt, max, "still pending");
                }
                Err(err) if err.is_retryable() => {
                    warn!(label, attempt, max, error = %err, "transient poll failure");
                }
                Err(err) => return Err(err),
            }
        }
        Err(ProviderError::Timeout { attempts: max })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::retry::RecordingSleeper;

    fn scripted(steps: Vec<Result<PollStatus, ProviderError>>) -> Arc<Mutex<VecDeque<Result<PollStatus, ProviderError>>>> {
        Arc::new(Mutex::new(steps.into()))
    }

    fn poller(max: u32) -> (Poller<Arc<RecordingSleeper>>, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::new());
        (Poller::new(PollPolicy::fixed(max, Duration::from_secs(3)), sleeper.clone()), sleeper)
    }

    #[tokio::test]
    async fn completes_after_pending_polls() {
        let (p, sleeper) = poller(10);
        let steps = scripted(vec![
            Ok(PollStatus::Pending),
            Err(ProviderError::transient("502")),
            Ok(PollStatus::Complete(Artifact::audio("https://cdn/x.mp3"))),
        ]);

        let out = p
            .run(
                "test",
                || {
                    let next = steps.lock().unwrap().pop_front().unwrap_or(Ok(PollStatus::Pending));
                    async move { next }
                },
                || async { true },
            )
            .await
            .unwrap();

        assert_eq!(out, PollOutcome::Complete(Artifact::audio("https://cdn/x.mp3")));
        assert_eq!(sleeper.calls(), vec![Duration::from_secs(3); 3]);
    }

    #[tokio::test]
    async fn exhausting_budget_times_out() {
        let (p, sleeper) = poller(4);
        let err = p
            .run("test", || async { Ok(PollStatus::Pending) }, || async { true })
            .await
            .unwrap_err();

        assert_eq!(err, ProviderError::Timeout { attempts: 4 });
        assert_eq!(sleeper.calls().len(), 4);
    }

    #[tokio::test]
    async fn provider_error_status_fails_without_retry() {
        let (p, sleeper) = poller(10);
        let err = p
            .run("test", || async { Ok(PollStatus::Error("content policy".into())) }, || async { true })
            .await
            .unwrap_err();

        assert_eq!(err, ProviderError::Generation("content policy".into()));
        assert_eq!(sleeper.calls().len(), 1);
    }

    #[tokio::test]
    async fn auth_error_is_not_retried() {
        let (p, _) = poller(10);
        let err = p
            .run("test", || async { Err(ProviderError::Auth("bad key".into())) }, || async { true })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Auth(_)));
    }

    #[tokio::test]
    async fn stops_when_no_longer_wanted() {
        let (p, _) = poller(10);
        let polls = Arc::new(Mutex::new(0u32));
        let wanted = Arc::new(Mutex::new(2u32));

        let out = p
            .run(
                "test",
                || {
                    *polls.lock().unwrap() += 1;
                    async { Ok(PollStatus::Pending) }
                },
                || {
                    let mut left = wanted.lock().unwrap();
                    let keep = *left > 0;
                    *left = left.saturating_sub(1);
                    async move { keep }
                },
            )
            .await
            .unwrap();

        assert_eq!(out, PollOutcome::Abandoned { attempts: 3 });
        assert_eq!(*polls.lock().unwrap(), 2);
    }
}
