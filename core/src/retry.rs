//! Linear backoff for services that signal rate limiting with HTTP 429.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Wait before re-issuing the request that failed at `attempt` (0-based).
    pub fn delay_before_retry(&self, attempt: u32) -> Duration {
        self.base_delay * (attempt + 1)
    }
}

/// Run `op` until it succeeds or fails with anything other than a rate limit.
///
/// Only [`ProviderError::RateLimited`] is retried, and only while
/// `attempt < max_retries`. Every other error ends the operation immediately.
pub async fn with_linear_backoff<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, ProviderError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0;

    loop {
        match op(attempt).await {
            Err(ProviderError::RateLimited) if attempt < policy.max_retries => {
                let delay = policy.delay_before_retry(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited, retrying after delay"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}
