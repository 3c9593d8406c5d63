//! Retry policies, plus support utilities for [`keen_retry`]'s retry API.
//!
//! Engines report each attempt as a [`RetryResult`], classifying failures as
//! either transient or fatal. [`attempt_with_retry`] then decides how long to
//! wait before trying again, using a [`RetryPolicy`]. Rate limits are a
//! special kind of transient failure that get a longer, fixed cooldown.

use std::{fmt, time::Duration};

use keen_retry::RetryResult;
use tokio::time;

use crate::prelude::*;

/// On error, return a [`RetryResult::Transient`] value.
macro_rules! try_transient {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(error) => {
                debug!("Potentially transient error: {:?}", error);
                return ::keen_retry::RetryResult::Transient {
                    input: (),
                    error: From::from(error),
                };
            }
        }
    };
}

/// On error, return either a [`RetryResult::Transient`] or [`RetryResult::Fatal`]
/// value, depending on the return value of [`IsKnownTransient::is_known_transient`].
macro_rules! try_potentially_transient {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(error) if IsKnownTransient::is_known_transient(&error) => {
                debug!("Potentially transient error: {:?}", error);
                return ::keen_retry::RetryResult::Transient {
                    input: (),
                    error: From::from(error),
                };
            }
            Err(error) => {
                return ::keen_retry::RetryResult::Fatal {
                    input: (),
                    error: From::from(error),
                };
            }
        }
    };
}

// Here's a trick to export a macro within a crate as if it were a normal
// symbol.
pub(crate) use {try_potentially_transient, try_transient};

/// Build an [`RetryResult::Ok`] value.
pub(crate) fn retry_result_ok<T, E>(output: T) -> RetryResult<(), (), T, E> {
    RetryResult::Ok {
        reported_input: (),
        output,
    }
}

/// Build an [`RetryResult::Fatal`] value.
pub(crate) fn retry_result_fatal<T, E>(error: E) -> RetryResult<(), (), T, E> {
    RetryResult::Fatal { input: (), error }
}

/// Build an [`RetryResult::Transient`] value.
pub(crate) fn retry_result_transient<T, E>(error: E) -> RetryResult<(), (), T, E> {
    RetryResult::Transient { input: (), error }
}

/// Is this error a known transient error?
///
/// Errors that are not transient are reported at once, without spending any
/// more attempts on them.
pub trait IsKnownTransient {
    /// Is this error likely to be transient?
    fn is_known_transient(&self) -> bool;
}

/// Compute an exponential backoff of `2^failed_attempt` seconds, where
/// `failed_attempt` is the zero-based index of the attempt that just failed.
pub fn exponential_backoff(failed_attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(failed_attempt))
}

/// How should we retry a failing operation?
pub struct RetryPolicy<E> {
    /// The maximum number of attempts, including the first one.
    pub max_attempts: u32,

    /// How long to wait after a failed attempt, given its zero-based index.
    pub backoff: fn(u32) -> Duration,

    /// How long to wait after being rate limited.
    pub rate_limit_cooldown: Duration,

    /// Does this error indicate that we were rate limited?
    pub is_rate_limited: fn(&E) -> bool,
}

impl<E> RetryPolicy<E> {
    /// Create a policy with exponential backoff.
    pub fn new(
        max_attempts: u32,
        rate_limit_cooldown: Duration,
        is_rate_limited: fn(&E) -> bool,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: exponential_backoff,
            rate_limit_cooldown,
            is_rate_limited,
        }
    }
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            rate_limit_cooldown: self.rate_limit_cooldown,
            is_rate_limited: self.is_rate_limited,
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("rate_limit_cooldown", &self.rate_limit_cooldown)
            .finish_non_exhaustive()
    }
}

/// The final result of [`attempt_with_retry`].
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    /// One of our attempts succeeded.
    Succeeded { output: T, attempts: u32 },

    /// We hit a fatal error, or ran out of attempts on ordinary transient
    /// errors.
    Failed { error: E, attempts: u32 },

    /// We ran out of attempts, and the last failure was a rate limit. Further
    /// requests are likely to fail the same way.
    RateLimited { error: E, attempts: u32 },
}

/// Call `op` until it succeeds, fails fatally, or exhausts `policy`.
///
/// `op` receives the 1-based attempt number.
pub async fn attempt_with_retry<T, E, F, Fut>(
    policy: &RetryPolicy<E>,
    mut op: F,
) -> RetryOutcome<T, E>
where
    E: fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = RetryResult<(), (), T, E>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op(attempt).await {
            RetryResult::Ok { output, .. } => {
                return RetryOutcome::Succeeded {
                    output,
                    attempts: attempt,
                };
            }
            RetryResult::Fatal { error, .. } => {
                debug!(attempt, %error, "Fatal error, not retrying");
                return RetryOutcome::Failed {
                    error,
                    attempts: attempt,
                };
            }
            RetryResult::Transient { error, .. } => {
                let rate_limited = (policy.is_rate_limited)(&error);
                if attempt >= policy.max_attempts {
                    return if rate_limited {
                        RetryOutcome::RateLimited {
                            error,
                            attempts: attempt,
                        }
                    } else {
                        RetryOutcome::Failed {
                            error,
                            attempts: attempt,
                        }
                    };
                }
                let wait = if rate_limited {
                    warn!(
                        attempt,
                        wait_secs = policy.rate_limit_cooldown.as_secs(),
                        "Rate limit hit, cooling down"
                    );
                    policy.rate_limit_cooldown
                } else {
                    let wait = (policy.backoff)(attempt - 1);
                    warn!(
                        attempt,
                        wait_secs = wait.as_secs(),
                        %error,
                        "Attempt failed, retrying"
                    );
                    wait
                };
                time::sleep(wait).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use tokio::time::Instant;

    use super::*;

    /// A tiny error type for exercising the policy.
    #[derive(Debug, PartialEq)]
    enum TestError {
        Flaky,
        Throttled,
        Broken,
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    /// Timers round up to the next millisecond, so allow a little slack.
    fn assert_elapsed(start: Instant, expected: Duration) {
        let elapsed = start.elapsed();
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_millis(50),
            "expected {:?}, got {:?}",
            expected,
            elapsed
        );
    }

    fn policy() -> RetryPolicy<TestError> {
        RetryPolicy::new(3, Duration::from_secs(60), |e| *e == TestError::Throttled)
    }

    #[test]
    fn backoff_doubles() {
        assert_eq!(exponential_backoff(0), Duration::from_secs(1));
        assert_eq!(exponential_backoff(1), Duration::from_secs(2));
        assert_eq!(exponential_backoff(3), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_with_backoff() {
        let start = Instant::now();
        let outcome = attempt_with_retry(&policy(), |attempt| async move {
            if attempt < 3 {
                retry_result_transient(TestError::Flaky)
            } else {
                retry_result_ok("done")
            }
        })
        .await;
        match outcome {
            RetryOutcome::Succeeded { output, attempts } => {
                assert_eq!(output, "done");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        // 1s after the first failure, 2s after the second.
        assert_elapsed(start, Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_are_not_retried() {
        let calls = RefCell::new(0);
        let outcome = attempt_with_retry(&policy(), |_| {
            *calls.borrow_mut() += 1;
            async { retry_result_fatal::<(), _>(TestError::Broken) }
        })
        .await;
        assert!(matches!(
            outcome,
            RetryOutcome::Failed {
                error: TestError::Broken,
                attempts: 1
            }
        ));
        assert_eq!(*calls.borrow(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_rate_limits_are_reported_separately() {
        let start = Instant::now();
        let outcome = attempt_with_retry(&policy(), |_| async {
            retry_result_transient::<(), _>(TestError::Throttled)
        })
        .await;
        assert!(matches!(
            outcome,
            RetryOutcome::RateLimited { attempts: 3, .. }
        ));
        // Two cooldowns, none after the final attempt.
        assert_elapsed(start, Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_transient_errors_fail() {
        let outcome = attempt_with_retry(&policy(), |_| async {
            retry_result_transient::<(), _>(TestError::Flaky)
        })
        .await;
        assert!(matches!(
            outcome,
            RetryOutcome::Failed {
                error: TestError::Flaky,
                attempts: 3
            }
        ));
    }
}
