//! Retry execution with bounded exponential backoff and identity rotation.
//!
//! [`RetryExecutor`] wraps a single logical network operation. Failures are
//! classified by [`FetchError::is_retryable`]; retryable ones are re-attempted
//! up to the configured budget with a growing delay, and the user-agent
//! identity is rotated from the fixed pool on every retry while staying
//! constant within an attempt. The last error is always surfaced, never
//! swallowed.

use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::user_agent::UserAgentPool;

use super::error::FetchError;

/// Default number of retries after the initial attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for the backoff schedule.
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Jitter bounds added to every backoff delay, in milliseconds.
const JITTER_MIN_MS: u64 = 100;
const JITTER_MAX_MS: u64 = 500;

/// Backoff schedule: how many retries and how fast delays grow.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Retries allowed after the initial attempt.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry `k` (1-indexed): `base * 2^(k-1)` plus uniform
    /// jitter in [100ms, 500ms].
    #[must_use]
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let backoff = self.base_delay.saturating_mul(1u32 << exponent);
        let jitter_ms = rand::thread_rng().gen_range(JITTER_MIN_MS..=JITTER_MAX_MS);
        backoff + Duration::from_millis(jitter_ms)
    }
}

/// Context handed to the operation for one attempt.
#[derive(Debug, Clone)]
pub struct Attempt {
    /// 1-indexed attempt number.
    pub number: u32,
    /// Identity to present for this attempt; constant within the attempt.
    pub user_agent: String,
}

/// Executes operations under a [`RetryPolicy`] with identity rotation and
/// cooperative cancellation.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    agents: UserAgentPool,
    cancel: CancellationToken,
}

impl RetryExecutor {
    #[must_use]
    pub fn new(policy: RetryPolicy, agents: UserAgentPool, cancel: CancellationToken) -> Self {
        Self {
            policy,
            agents,
            cancel,
        }
    }

    /// Convenience constructor with default policy, built-in agents, and a
    /// token that never fires.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(
            RetryPolicy::default(),
            UserAgentPool::builtin(),
            CancellationToken::new(),
        )
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `op` until it succeeds, fails terminally, or the retry budget is
    /// exhausted.
    ///
    /// The first attempt uses the pool's initial identity; each retry sleeps
    /// the backoff delay and rotates to a fresh identity. Cancellation is
    /// observed before every attempt and while sleeping.
    ///
    /// # Errors
    ///
    /// Returns the operation's last [`FetchError`] once the budget is spent,
    /// the first non-retryable error immediately, or [`FetchError::Cancelled`].
    pub async fn execute<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut user_agent = self.agents.initial().to_string();
        let total_attempts = self.policy.max_retries + 1;

        for attempt in 1..=total_attempts {
            if attempt > 1 {
                let delay = self.policy.delay_before_retry(attempt - 1);
                debug!(
                    operation = label,
                    attempt,
                    delay_ms = delay.as_millis(),
                    "backing off before retry"
                );
                tokio::select! {
                    () = self.cancel.cancelled() => return Err(FetchError::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
                user_agent = self.agents.rotate();
            } else if self.cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let result = op(Attempt {
                number: attempt,
                user_agent: user_agent.clone(),
            })
            .await;

            match result {
                Ok(value) => {
                    debug!(operation = label, attempt, "operation succeeded");
                    return Ok(value);
                }
                Err(error) if error.is_retryable() && attempt < total_attempts => {
                    warn!(
                        operation = label,
                        attempt,
                        error = %error,
                        "retryable failure"
                    );
                }
                Err(error) => {
                    debug!(
                        operation = label,
                        attempt,
                        error = %error,
                        "operation failed terminally"
                    );
                    return Err(error);
                }
            }
        }

        // The loop always returns from its final iteration.
        unreachable!("retry loop exited without a result")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio::time::Instant;

    use super::*;

    fn executor(max_retries: u32, base_delay: Duration) -> RetryExecutor {
        RetryExecutor::new(
            RetryPolicy::new(max_retries, base_delay),
            UserAgentPool::builtin(),
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_delay_grows_exponentially() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1));
        let first = policy.delay_before_retry(1);
        let second = policy.delay_before_retry(2);
        let third = policy.delay_before_retry(3);

        // base * 2^(k-1) plus jitter in [100ms, 500ms]
        assert!(first >= Duration::from_millis(1100) && first <= Duration::from_millis(1500));
        assert!(second >= Duration::from_millis(2100) && second <= Duration::from_millis(2500));
        assert!(third >= Duration::from_millis(4100) && third <= Duration::from_millis(4500));
    }

    #[test]
    fn test_delay_jitter_within_bounds() {
        let policy = RetryPolicy::new(3, Duration::from_millis(0));
        for _ in 0..100 {
            let jitter = policy.delay_before_retry(1);
            assert!(jitter >= Duration::from_millis(100));
            assert!(jitter <= Duration::from_millis(500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let executor = executor(3, Duration::from_secs(1));
        let calls = Arc::new(AtomicU32::new(0));
        let started: Arc<std::sync::Mutex<Vec<Instant>>> =
            Arc::new(std::sync::Mutex::new(Vec::new()));

        let calls_in = Arc::clone(&calls);
        let started_in = Arc::clone(&started);
        let result = executor
            .execute("test", move |attempt| {
                let calls = Arc::clone(&calls_in);
                let started = Arc::clone(&started_in);
                async move {
                    started.lock().unwrap().push(Instant::now());
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n <= 2 {
                        Err(FetchError::http_status("https://example.com", 503))
                    } else {
                        Ok(attempt.number)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // Inter-attempt delays strictly increase across the two retries.
        let starts = started.lock().unwrap();
        let gap_one = starts[1] - starts[0];
        let gap_two = starts[2] - starts[1];
        assert!(
            gap_two > gap_one,
            "second gap {gap_two:?} should exceed first gap {gap_one:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_immediately() {
        let executor = executor(3, Duration::from_secs(1));
        let calls = Arc::new(AtomicU32::new(0));

        let calls_in = Arc::clone(&calls);
        let result: Result<(), _> = executor
            .execute("test", move |_attempt| {
                let calls = Arc::clone(&calls_in);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(FetchError::http_status("https://example.com", 404))
                }
            })
            .await;

        assert!(matches!(
            result.unwrap_err(),
            FetchError::HttpStatus { status: 404, .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_returns_last_error() {
        let executor = executor(2, Duration::from_millis(10));
        let calls = Arc::new(AtomicU32::new(0));

        let calls_in = Arc::clone(&calls);
        let result: Result<(), _> = executor
            .execute("test", move |_attempt| {
                let calls = Arc::clone(&calls_in);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(FetchError::http_status("https://example.com", 503))
                }
            })
            .await;

        assert!(matches!(
            result.unwrap_err(),
            FetchError::HttpStatus { status: 503, .. }
        ));
        // initial attempt plus two retries
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identity_rotated_on_retry_and_held_within_attempt() {
        let pool = UserAgentPool::builtin();
        let executor = RetryExecutor::new(
            RetryPolicy::new(2, Duration::from_millis(10)),
            pool.clone(),
            CancellationToken::new(),
        );

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_in = Arc::clone(&seen);
        let _: Result<(), _> = executor
            .execute("test", move |attempt| {
                let seen = Arc::clone(&seen_in);
                async move {
                    seen.lock().unwrap().push(attempt.user_agent.clone());
                    Err(FetchError::http_status("https://example.com", 503))
                }
            })
            .await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0], pool.initial());
        for agent in seen.iter() {
            assert!(pool.contains(agent), "identity must come from the pool");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_before_attempt() {
        let cancel = CancellationToken::new();
        let executor = RetryExecutor::new(
            RetryPolicy::default(),
            UserAgentPool::builtin(),
            cancel.clone(),
        );
        cancel.cancel();

        let result: Result<(), _> = executor.execute("test", |_attempt| async { Ok(()) }).await;
        // Token fired before the first attempt ran.
        assert!(matches!(result.unwrap_err(), FetchError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_backoff_sleep() {
        let cancel = CancellationToken::new();
        let executor = RetryExecutor::new(
            RetryPolicy::new(3, Duration::from_secs(3600)),
            UserAgentPool::builtin(),
            cancel.clone(),
        );

        let cancel_soon = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel_soon.cancel();
        });

        let result: Result<(), _> = executor
            .execute("test", |_attempt| async {
                Err(FetchError::http_status("https://example.com", 503))
            })
            .await;
        assert!(matches!(result.unwrap_err(), FetchError::Cancelled));
    }
}
