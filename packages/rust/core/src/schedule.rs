//! Call pacing and bounded retries for external services.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use storyreel_shared::{Result, StoryReelError};

use crate::cancel::StageStop;

/// Hands out call slots at least `min_interval` apart.
///
/// Slots are reserved when requested, so concurrent callers queue up
/// instead of firing together.
#[derive(Debug)]
pub struct FixedDelayScheduler {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl FixedDelayScheduler {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until the next free slot.
    pub async fn wait_turn(&self) {
        let slot = {
            let now = Instant::now();
            let mut next = self.next_slot.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = next.map_or(now, |n| n.max(now));
            *next = Some(slot + self.min_interval);
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}

/// How often a failed stage call is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure.
    pub max_retries: u32,
    /// Fixed delay between attempts.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::ZERO,
        }
    }
}

/// Errors a fresh attempt might cure.
fn is_retryable(err: &StoryReelError) -> bool {
    matches!(
        err,
        StoryReelError::Planning { .. } | StoryReelError::AssetGeneration { .. }
    )
}

/// Run `op`, retrying retryable failures up to the policy's budget.
/// Stops retrying as soon as the stage is stopped.
pub(crate) async fn with_retries<T, F, Fut>(
    policy: RetryPolicy,
    stop: &StageStop,
    what: &str,
    op: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_retries && is_retryable(&err) && !stop.is_stopped() => {
                attempt += 1;
                warn!(what, attempt, max = policy.max_retries, error = %err, "retrying");
                tokio::select! {
                    _ = tokio::time::sleep(policy.backoff) => {}
                    _ = stop.stopped() => return Err(err),
                }
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::cancel::RunCancellation;

    #[tokio::test(start_paused = true)]
    async fn scheduler_spaces_calls() {
        let scheduler = FixedDelayScheduler::new(Duration::from_millis(500));
        let start = Instant::now();

        let mut stamps = Vec::new();
        for _ in 0..4 {
            scheduler.wait_turn().await;
            stamps.push(start.elapsed());
        }

        assert_eq!(stamps[0], Duration::ZERO);
        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_callers_are_not_delayed_further() {
        let scheduler = FixedDelayScheduler::new(Duration::from_millis(500));
        scheduler.wait_turn().await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        let before = Instant::now();
        scheduler.wait_turn().await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_up_to_budget() {
        let calls = AtomicU32::new(0);
        let stop = StageStop::new(&RunCancellation::new());
        let policy = RetryPolicy {
            max_retries: 2,
            backoff: Duration::from_millis(100),
        };

        let result: Result<()> = with_retries(policy, &stop, "image", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StoryReelError::image(0, "boom"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let stop = StageStop::new(&RunCancellation::new());
        let policy = RetryPolicy {
            max_retries: 1,
            backoff: Duration::from_millis(100),
        };

        let value = with_retries(policy, &stop, "narration", || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(StoryReelError::narration(1, "503"))
            } else {
                Ok(42)
            }
        })
        .await
        .expect("second attempt succeeds");

        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn default_policy_does_not_retry() {
        let calls = AtomicU32::new(0);
        let stop = StageStop::new(&RunCancellation::new());

        let _ = with_retries(RetryPolicy::none(), &stop, "planning", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(StoryReelError::planning("bad json"))
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let stop = StageStop::new(&RunCancellation::new());
        let policy = RetryPolicy {
            max_retries: 5,
            backoff: Duration::ZERO,
        };

        let _ = with_retries(policy, &stop, "image", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(StoryReelError::io("/x", std::io::Error::other("disk full")))
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
