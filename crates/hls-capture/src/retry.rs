// Retry-with-backoff for playlist and segment requests.
//
// Exponential backoff with a capped delay and optional jitter; the caller classifies
// each attempt as success, retryable or terminal.

use std::future::Future;
use std::time::Duration;

use rand::RngExt;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::FetchError;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not counting the initial attempt).
    pub max_retries: u32,
    /// Base delay between retries. Actual delay = base * 2^attempt + jitter.
    pub base_delay: Duration,
    /// Hard cap on the computed delay, jitter included.
    pub max_delay: Duration,
    /// Adds random jitter of [0, base_delay/2).
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Total number of attempts including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Compute the delay after a failed attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // attempts >= 32 saturate instead of overflowing the shift.
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let exp_delay = self
            .base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay);
        let capped = exp_delay.min(self.max_delay);

        if !self.jitter {
            return capped;
        }

        let jitter_range_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX) / 2;
        let remaining_ms =
            u64::try_from(self.max_delay.saturating_sub(capped).as_millis()).unwrap_or(0);
        let jitter_limit_ms = jitter_range_ms.min(remaining_ms);
        if jitter_limit_ms == 0 {
            return capped;
        }

        let jitter_ms = rand::rng().random_range(0..jitter_limit_ms);
        (capped + Duration::from_millis(jitter_ms)).min(self.max_delay)
    }

    /// Longest a request can take across all attempts when each attempt is bounded
    /// by `per_attempt`, jittered backoff included.
    pub fn worst_case(&self, per_attempt: Duration) -> Duration {
        let jitter = if self.jitter {
            self.base_delay / 2
        } else {
            Duration::ZERO
        };
        let wait = |attempt: u32| {
            let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
            let delay = self
                .base_delay
                .checked_mul(multiplier)
                .unwrap_or(self.max_delay)
                .min(self.max_delay);
            delay.saturating_add(jitter).min(self.max_delay)
        };
        // Waits past attempt 32 are bounded by the cap.
        let growing = self.max_retries.min(32);
        let backoff = (0..growing)
            .map(wait)
            .fold(Duration::ZERO, Duration::saturating_add)
            .saturating_add(self.max_delay.saturating_mul(self.max_retries - growing));
        per_attempt
            .saturating_mul(self.max_attempts())
            .saturating_add(backoff)
    }
}

/// Result of a single attempt, used by the caller to signal retryability.
pub enum RetryAction<T> {
    Success(T),
    /// Retryable failure (network, 5xx, 429, timeout).
    Retry(String),
    /// Terminal failure (4xx, parse error); no further attempts.
    Fail(String),
}

/// Execute an async operation with retry-and-backoff.
///
/// The `operation` closure receives the current attempt number (0-indexed). Any
/// failure that ends the loop, either terminal or by reaching the attempt ceiling,
/// is reported as [`FetchError::Exhausted`] carrying the number of attempts made.
/// Sleeps between attempts race against `token`.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    operation: F,
) -> Result<T, FetchError>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = RetryAction<T>>,
{
    let mut attempt = 0u32;
    loop {
        if token.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let reason = match operation(attempt).await {
            RetryAction::Success(value) => return Ok(value),
            RetryAction::Fail(reason) => return Err(FetchError::exhausted(attempt + 1, reason)),
            RetryAction::Retry(reason) => reason,
        };

        if attempt >= policy.max_retries {
            return Err(FetchError::exhausted(attempt + 1, reason));
        }

        let delay = policy.delay_for_attempt(attempt);
        warn!(
            attempt = attempt + 1,
            max = policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %FetchError::transient(reason),
            "Retrying after transient error"
        );
        tokio::select! {
            _ = token.cancelled() => return Err(FetchError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}

/// Classify a reqwest error as retryable or non-retryable.
///
/// Retryable: connect, timeout, request, body read, and decode errors.
pub fn is_retryable_reqwest_error(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() || e.is_decode()
}

/// Classify a non-success HTTP status. 408, 429 and 5xx are worth another attempt;
/// everything else (403/404/410...) means the resource is gone.
pub fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    status.is_server_error()
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn worst_case_adds_attempts_and_capped_backoff() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(3),
            jitter: false,
        };
        // 4 attempts of 10s, then waits of 1s, 2s and 3s (4s capped).
        assert_eq!(policy.worst_case(Duration::from_secs(10)), Duration::from_secs(46));

        let jittered = RetryPolicy {
            jitter: true,
            ..policy
        };
        // Jitter adds up to 500ms per wait, still under the cap.
        assert_eq!(
            jittered.worst_case(Duration::from_secs(10)),
            Duration::from_millis(47_000)
        );

        let no_retries = RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        };
        assert_eq!(no_retries.worst_case(Duration::from_secs(10)), Duration::from_secs(10));
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: false,
        }
    }

    #[test]
    fn delay_respects_max_cap() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            jitter: false,
        };
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(5));
    }

    #[test]
    fn jitter_never_exceeds_cap() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(1),
            jitter: true,
        };
        for _ in 0..32 {
            assert!(policy.delay_for_attempt(10) <= Duration::from_secs(1));
        }
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: false,
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
    }

    #[test]
    fn jitter_stays_within_half_base() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: true,
        };
        let delay = policy.delay_for_attempt(0);
        assert!(delay >= Duration::from_millis(100));
        assert!(delay < Duration::from_millis(150));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        let result = retry_with_backoff(&fast_policy(3), &token, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    RetryAction::Retry("HTTP 503".to_string())
                } else {
                    RetryAction::Success(attempt)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn ceiling_reports_exhausted_with_attempt_count() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        let result: Result<(), _> = retry_with_backoff(&fast_policy(2), &token, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { RetryAction::Retry("timeout".to_string()) }
        })
        .await;
        match result {
            Err(FetchError::Exhausted { attempts, reason }) => {
                assert_eq!(attempts, 3);
                assert_eq!(reason, "timeout");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn terminal_failure_stops_immediately() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        let result: Result<(), _> = retry_with_backoff(&fast_policy(5), &token, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { RetryAction::Fail("HTTP 404".to_string()) }
        })
        .await;
        assert!(matches!(
            result,
            Err(FetchError::Exhausted { attempts: 1, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(60),
            jitter: false,
        };
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let result: Result<(), _> = retry_with_backoff(&policy, &token, |_| async {
            RetryAction::Retry("HTTP 500".to_string())
        })
        .await;
        assert!(matches!(result, Err(FetchError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn status_classification() {
        use reqwest::StatusCode;
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::GONE));
        assert!(!is_retryable_status(StatusCode::FORBIDDEN));
    }
}
