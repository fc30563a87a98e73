//! Retry with exponential backoff
//!
//! Only [`Error::is_retryable`] failures are retried; everything else is
//! returned on the first attempt.

use std::future::Future;

use crate::config::RetryConfig;
use crate::error::Result;

/// Run `operation` until it succeeds, fails permanently or runs out of attempts
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, what: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let delay = config.backoff(attempt);
                tracing::warn!(
                    operation = what,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
