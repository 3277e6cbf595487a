use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};

use super::{DataError, DataResult};

/// Retry an operation with exponential backoff: base 1s, capped at 15s,
/// up to `max_attempts` tries. Only transient errors are retried; permanent
/// failures (4xx, parse errors, config) abort immediately.
pub async fn retry_with_backoff<F, Fut, T>(operation: F, max_attempts: usize) -> DataResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = DataResult<T>>,
{
    let mut delays = ExponentialBackoff::from_millis(1000)
        .max_delay(Duration::from_secs(15))
        .map(jitter)
        .take(max_attempts.saturating_sub(1));

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() => {
                if let DataError::RateLimit { retry_after } = &e {
                    tokio::time::sleep(Duration::from_secs(*retry_after)).await;
                }
                match delays.next() {
                    Some(delay) => {
                        tracing::warn!("Retryable error: {}, next attempt in {:?}", e, delay);
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::error!("Giving up after {} attempts: {}", max_attempts, e);
                        return Err(e);
                    }
                }
            }
            Err(e) => {
                tracing::error!("Non-retryable error: {}", e);
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_succeeds_first_try() {
        let calls = AtomicUsize::new(0);
        let result: DataResult<u32> = retry_with_backoff(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            },
            3,
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: DataResult<u32> = retry_with_backoff(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(DataError::api_error(404, "gone"))
            },
            3,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
