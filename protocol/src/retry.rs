//! # Bounded Retry
//!
//! Both external capabilities the engine leans on (the price feed and the
//! proof system) may be remote, and remote things fail transiently. Every
//! call to them goes through [`retry_with_timeout`]: each attempt is bounded
//! by a `tokio::time::timeout`, transient failures back off exponentially,
//! and after `max_attempts` the last failure is handed back to the caller,
//! who maps it into its own error category.
//!
//! Nothing here ever turns a failure into "allow". Exhaustion is an error.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Errors that know whether trying again could help.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

/// Exponential backoff schedule: `initial * multiplier^(attempt - 1)`, capped
/// at `max_backoff_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            multiplier: 1,
        }
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = u64::from(self.multiplier).saturating_pow(exponent);
        let delay_ms = self.initial_backoff_ms.saturating_mul(factor);
        Duration::from_millis(delay_ms.min(self.max_backoff_ms))
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".into());
        }
        if self.multiplier == 0 {
            return Err("multiplier must be at least 1".into());
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(format!(
                "initial_backoff_ms {} exceeds max_backoff_ms {}",
                self.initial_backoff_ms, self.max_backoff_ms
            ));
        }
        Ok(())
    }
}

/// Why a retried call finally gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The last attempt hit the per-attempt timeout.
    TimedOut { attempts: u32, timeout: Duration },
    /// Every attempt failed transiently; this is the last failure.
    Exhausted { attempts: u32, last: E },
    /// A non-transient failure. Not retried.
    Fatal(E),
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut { attempts, timeout } => write!(
                f,
                "timed out after {attempts} attempt(s) of {}ms",
                timeout.as_millis()
            ),
            Self::Exhausted { attempts, last } => {
                write!(f, "gave up after {attempts} attempt(s): {last}")
            }
            Self::Fatal(e) => write!(f, "{e}"),
        }
    }
}

/// Run `op` until it succeeds, fails fatally, or the policy runs out.
///
/// `op` receives the 1-based attempt number. `operation` is only used for
/// logging.
pub async fn retry_with_timeout<T, E, F, Fut>(
    policy: &RetryPolicy,
    timeout: Duration,
    operation: &'static str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let failure = match tokio::time::timeout(timeout, op(attempt)).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) if !e.is_transient() => return Err(RetryError::Fatal(e)),
            Ok(Err(e)) => {
                if attempt >= max_attempts {
                    return Err(RetryError::Exhausted { attempts: attempt, last: e });
                }
                e.to_string()
            }
            Err(_elapsed) => {
                if attempt >= max_attempts {
                    return Err(RetryError::TimedOut { attempts: attempt, timeout });
                }
                format!("timed out after {}ms", timeout.as_millis())
            }
        };

        let delay = policy.delay_for_attempt(attempt);
        warn!(
            operation,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %failure,
            "transient failure, backing off"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Flaky(bool);

    impl fmt::Display for Flaky {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "flaky(transient={})", self.0)
        }
    }

    impl Retryable for Flaky {
        fn is_transient(&self) -> bool {
            self.0
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
            multiplier: 2,
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for_attempt(64), Duration::from_millis(1_000));
    }

    #[test]
    fn zero_attempts_policy_is_invalid() {
        let policy = RetryPolicy { max_attempts: 0, ..RetryPolicy::default() };
        assert!(policy.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, RetryError<Flaky>> =
            retry_with_timeout(&RetryPolicy::default(), Duration::from_secs(1), "test", |n| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        Err(Flaky(true))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> =
            retry_with_timeout(&RetryPolicy::default(), Duration::from_secs(1), "test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Flaky(false)) }
            })
            .await;
        assert!(matches!(result, Err(RetryError::Fatal(Flaky(false)))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_the_last_error() {
        let result: Result<(), _> =
            retry_with_timeout(&RetryPolicy::default(), Duration::from_secs(1), "test", |_| async {
                Err(Flaky(true))
            })
            .await;
        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 3, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_calls_time_out() {
        let result: Result<(), RetryError<Flaky>> =
            retry_with_timeout(&RetryPolicy::none(), Duration::from_millis(50), "test", |_| {
                std::future::pending()
            })
            .await;
        assert!(matches!(result, Err(RetryError::TimedOut { attempts: 1, .. })));
    }
}
