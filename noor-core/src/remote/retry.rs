//! Retry policy for remote calls
//!
//! Bounded attempts with exponential backoff. Only transient failures are
//! retried; for non-idempotent calls only failures where the request never
//! reached the service are.

use crate::config::{DEFAULT_REMOTE_MAX_ATTEMPTS, RETRY_BASE_DELAY_MS, RETRY_MAX_DELAY_MS};
use crate::error::{AppError, Result};
use std::future::Future;
use std::time::Duration;

/// Whether repeating a call is harmless
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idempotency {
    /// Reads, deletes and full updates
    Idempotent,
    /// Creates: a repeat could leave a duplicate document behind
    NonIdempotent,
}

impl Idempotency {
    fn allows_retry(self, error: &AppError) -> bool {
        match self {
            Idempotency::Idempotent => error.is_transient(),
            Idempotency::NonIdempotent => error.is_unsent(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
            max_delay: Duration::from_millis(RETRY_MAX_DELAY_MS),
        }
    }

    /// A single attempt, no retries
    pub fn none() -> Self {
        Self::new(1)
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Sleep before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `call` until it succeeds, fails permanently, or attempts run out
    pub async fn run<T, F, Fut>(&self, operation: &str, idempotency: Idempotency, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts && idempotency.allows_retry(&e) => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}, retrying in {:?}",
                        operation,
                        attempt,
                        self.max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        tracing::warn!("{} failed after {} attempt(s): {}", operation, attempt, e);
                    }
                    return Err(e);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_REMOTE_MAX_ATTEMPTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts).with_base_delay(Duration::from_millis(1))
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(5);
        assert_eq!(policy.delay_for(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for(2), Duration::from_millis(500));
        assert_eq!(policy.delay_for(3), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(30), Duration::from_millis(RETRY_MAX_DELAY_MS));
    }

    #[test]
    fn test_zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new(0).max_attempts, 1);
    }

    #[tokio::test]
    async fn test_retries_transient_failure_once() {
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result = fast(2)
            .run("list", Idempotency::Idempotent, move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(AppError::Transient("502".to_string()))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result: Result<()> = fast(2)
            .run("list", Idempotency::Idempotent, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::Transient("timeout".to_string()))
            })
            .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_never_retries_unauthenticated() {
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result: Result<()> = fast(3)
            .run("list", Idempotency::Idempotent, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::Unauthenticated)
            })
            .await;

        assert!(matches!(result, Err(AppError::Unauthenticated)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_creates_only_retry_unsent_requests() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = fast(3)
            .run("create", Idempotency::NonIdempotent, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::Transient("timed out".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = fast(3)
            .run("create", Idempotency::NonIdempotent, move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(AppError::Unreachable("connection refused".to_string()))
                } else {
                    Ok("doc-1")
                }
            })
            .await;
        assert_eq!(result.unwrap(), "doc-1");
    }
}
