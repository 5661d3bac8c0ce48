//! Bounded retry with exponential backoff for model calls.

use std::future::Future;
use std::time::Duration;

use crate::error::LlmError;

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn with_retries(max_retries: u32) -> Self {
        Self { max_attempts: max_retries.saturating_add(1), ..Self::default() }
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error,
    /// or runs out of attempts. The last error is returned.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut backoff = self.initial_backoff;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            if !error.is_retryable() || attempt >= attempts {
                return Err(error);
            }

            let delay = match &error {
                LlmError::RateLimited { retry_after_ms: Some(ms) } => {
                    Duration::from_millis(*ms).min(self.max_backoff)
                }
                _ => backoff.mul_f64(0.75 + jitter_factor() * 0.5),
            };
            tracing::warn!(
                event_name = "llm.request.retry",
                attempt,
                max_attempts = attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "retrying model request"
            );
            tokio::time::sleep(delay).await;

            backoff = Duration::from_secs_f64(
                (backoff.as_secs_f64() * self.multiplier).min(self.max_backoff.as_secs_f64()),
            );
        }
    }
}

/// Value in `[0, 1)` derived from the clock; spreads retries without a rand dependency.
fn jitter_factor() -> f64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .hash(&mut hasher);
    std::thread::current().id().hash(&mut hasher);
    (hasher.finish() % 10_000) as f64 / 10_000.0
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::RetryPolicy;
    use crate::error::LlmError;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = fast(3)
            .execute(|| async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(LlmError::Timeout(10))
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result.ok(), Some("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_stop_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), LlmError> = fast(5)
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LlmError::Authentication("bad key".into()))
            })
            .await;

        assert!(matches!(result, Err(LlmError::Authentication(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<(), LlmError> = fast(2)
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LlmError::Api { status: 503, message: "unavailable".into() })
            })
            .await;

        assert!(matches!(result, Err(LlmError::Api { status: 503, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
