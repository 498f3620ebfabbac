use crate::errors::AppResult;
use crate::models::AppSettings;
use std::future::Future;
use tokio::time::Duration;

const MIN_BACKOFF_MS: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff_ms: u64,
}

impl RetryPolicy {
    pub fn from_settings(settings: &AppSettings) -> Self {
        Self {
            max_retries: settings.provider_max_retries,
            base_backoff_ms: settings.provider_retry_backoff_ms,
        }
    }

    /// Exponential: base, 2*base, 4*base, ... for retry 1, 2, 3, ...
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1);
        let multiplier: u64 = 1_u64.checked_shl(shift).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_backoff_ms.saturating_mul(multiplier).max(MIN_BACKOFF_MS))
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or the
/// retry budget is spent. The closure receives the 1-based attempt number.
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, label: &str, mut operation: F) -> AppResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt = 0_u32;
    loop {
        attempt = attempt.saturating_add(1);
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() && attempt <= policy.max_retries => {
                let delay = policy.delay_for_retry(attempt);
                tracing::warn!(
                    operation = label,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retrying after upstream failure"
                );
                tokio::time::sleep(delay).await;
            }
            Err(error) => {
                if error.is_retryable() {
                    tracing::warn!(operation = label, attempt, error = %error, "retry budget exhausted");
                }
                return Err(error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{retry_with_backoff, RetryPolicy};
    use crate::errors::AppError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Duration;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_backoff_ms: 100,
        }
    }

    #[test]
    fn backoff_doubles_per_retry() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_backoff_ms: 250,
        };
        assert_eq!(policy.delay_for_retry(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for_retry(2), Duration::from_millis(500));
        assert_eq!(policy.delay_for_retry(3), Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_upstream_failures_until_success() {
        let calls = AtomicU32::new(0);
        let value = retry_with_backoff(&policy(2), "test", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(AppError::UpstreamUnavailable("flaky".to_string()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await
        .expect("eventually succeeds");
        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<(), AppError> = retry_with_backoff(&policy(1), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::UpstreamUnavailable("down".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(AppError::UpstreamUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn does_not_retry_workflow_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), AppError> = retry_with_backoff(&policy(5), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(AppError::Conflict {
                    message: "dup".to_string(),
                    existing_id: "x".to_string(),
                })
            }
        })
        .await;
        assert!(matches!(result, Err(AppError::Conflict { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
