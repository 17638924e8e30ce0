//! Retry with a fixed backoff.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::{CairnError, Result};

/// Retry settings shared by the background jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Total number of attempts.
    pub max_retries: u32,
    /// Pause after each failed attempt.
    pub throttle: Duration,
}

impl Backoff {
    /// Create retry settings.
    pub fn new(max_retries: u32, throttle: Duration) -> Self {
        Self {
            max_retries,
            throttle,
        }
    }

    /// Run `op` with these settings.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        call_with_retry(self.max_retries, self.throttle, op).await
    }
}

/// Call `op` up to `max_retries` times, sleeping `throttle` between failures.
///
/// Returns the first success, or [`CairnError::RetriesExhausted`] wrapping
/// the last error once every attempt has failed. `max_retries` must be at least 1.
pub async fn call_with_retry<T, F, Fut>(max_retries: u32, throttle: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if max_retries == 0 {
        return Err(CairnError::InvalidArgument(
            "max retries must be > 0".to_string(),
        ));
    }

    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_retries => {
                debug!("Attempt {}/{} failed: {}", attempt, max_retries, e);
                tokio::time::sleep(throttle).await;
                attempt += 1;
            }
            Err(e) => {
                warn!("Giving up after {} attempts: {}", max_retries, e);
                return Err(CairnError::RetriesExhausted {
                    attempts: max_retries,
                    source: Box::new(e),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_first_success_returns_immediately() {
        let calls = AtomicU32::new(0);
        let result = call_with_retry(3, Duration::from_millis(1), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, CairnError>("done")
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_failures() {
        let calls = AtomicU32::new(0);
        let result = call_with_retry(3, Duration::from_millis(1), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(CairnError::Storage("flaky".to_string()))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_exhausted() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = call_with_retry(4, Duration::from_millis(1), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Err(CairnError::Storage(format!("down on attempt {n}")))
        })
        .await;

        match result {
            Err(CairnError::RetriesExhausted { attempts, source }) => {
                assert_eq!(attempts, 4);
                assert!(matches!(*source, CairnError::Storage(ref m) if m == "down on attempt 4"));
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_zero_retries_rejected() {
        let result = call_with_retry(0, Duration::ZERO, || async { Ok(()) }).await;
        assert!(matches!(result, Err(CairnError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_backoff_call() {
        let backoff = Backoff::new(2, Duration::from_millis(1));
        let value = backoff.call(|| async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }
}
