//! Retry policy for external embedding and generation calls.
//!
//! Every call runs under a timeout. Rate limits, server errors and timeouts
//! are retried with exponential backoff plus jitter until the attempt budget
//! is spent; anything else fails immediately.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{RagError, Result, ServiceError};

/// The last error seen once a call has stopped being retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryFailure {
    /// Attempts made, including the first.
    pub attempts: u32,
    /// The error from the final attempt.
    pub error: ServiceError,
}

impl From<RetryFailure> for RagError {
    fn from(failure: RetryFailure) -> Self {
        RagError::Service { attempts: failure.attempts, source: failure.error }
    }
}

/// Bounded exponential backoff with jitter and a per-attempt timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub base_delay: Duration,
    /// Upper bound on the exponential part of the delay.
    pub max_delay: Duration,
    /// Upper bound on the random delay added to each backoff.
    pub jitter: Duration,
    /// Time allowed for a single attempt.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter: Duration::from_millis(100),
            timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn no_retry(timeout: Duration) -> Self {
        Self { max_attempts: 1, timeout, ..Self::default() }
    }

    /// Check that the policy can make progress.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfig`] if `max_attempts` or `timeout` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(RagError::InvalidConfig("max_attempts must be at least 1".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(RagError::InvalidConfig("timeout must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let exponential = self.base_delay.saturating_mul(1 << exponent).min(self.max_delay);
        exponential + pseudo_jitter(self.jitter)
    }

    /// Run `call` until it succeeds, fails permanently or runs out of attempts.
    ///
    /// Returns the value together with the number of attempts it took.
    /// `provider` names the service in timeout errors; `operation` labels the logs.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        provider: &str,
        mut call: F,
    ) -> std::result::Result<(T, u32), RetryFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ServiceError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = match tokio::time::timeout(self.timeout, call()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ServiceError::Timeout {
                    provider: provider.to_string(),
                    after: self.timeout,
                }),
            };

            match outcome {
                Ok(value) => return Ok((value, attempt)),
                Err(error) if error.is_retryable() && attempt < max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        operation,
                        provider,
                        attempt,
                        ?delay,
                        error = %error,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(RetryFailure { attempts: attempt, error }),
            }
        }
    }
}

/// Cheap jitter in `[0, limit]` from the clock's sub-second nanos.
fn pseudo_jitter(limit: Duration) -> Duration {
    let limit_nanos = limit.as_nanos() as u64;
    if limit_nanos == 0 {
        return Duration::ZERO;
    }
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    Duration::from_nanos(nanos % (limit_nanos + 1))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter: Duration::ZERO,
            timeout: Duration::from_secs(5),
        }
    }

    fn rate_limited() -> ServiceError {
        ServiceError::RateLimited { provider: "test".into(), message: "slow down".into() }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = policy(10);
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(4), Duration::from_millis(800));
        assert_eq!(p.backoff(5), Duration::from_secs(1));
        assert_eq!(p.backoff(40), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_limit() {
        let p = RetryPolicy { jitter: Duration::from_millis(50), ..policy(3) };
        let delay = p.backoff(1);
        assert!(delay >= Duration::from_millis(100));
        assert!(delay <= Duration::from_millis(150));
    }

    #[test]
    fn zero_attempts_is_invalid() {
        assert!(policy(0).validate().is_err());
        assert!(policy(1).validate().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = policy(4)
            .run("embed", "test", || {
                let counter = counter.clone();
                async move {
                    let attempt = counter.fetch_add(1, Ordering::SeqCst);
                    if attempt < 2 { Err(rate_limited()) } else { Ok(7) }
                }
            })
            .await;
        assert_eq!(result, Ok((7, 3)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: std::result::Result<((), u32), _> = policy(3)
            .run("embed", "test", || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(rate_limited()) }
            })
            .await;
        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 3);
        assert_eq!(failure.error, rate_limited());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: std::result::Result<((), u32), _> = policy(5)
            .run("generate", "test", || {
                counter.fetch_add(1, Ordering::SeqCst);
                let auth =
                    ServiceError::Auth { provider: "test".into(), message: "bad key".into() };
                async move { Err(auth) }
            })
            .await;
        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_are_retried_like_rate_limits() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let p = RetryPolicy { timeout: Duration::from_millis(50), ..policy(2) };
        let result: std::result::Result<((), u32), _> = p
            .run("generate", "slow", || {
                counter.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(())
                }
            })
            .await;
        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 2);
        assert!(matches!(failure.error, ServiceError::Timeout { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
