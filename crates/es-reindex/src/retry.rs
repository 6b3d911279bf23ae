//! Fixed-pause retry for store calls.
//!
//! Scan and scroll requests go through [`with_retry`]; remote protocol errors
//! short-circuit because no amount of retrying fixes a rejected query.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,
    /// Pause before every retry.
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::for_scroll()
    }
}

impl RetryConfig {
    /// Same pause between every attempt.
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// The scroll policy: 100 retries one second apart.
    pub fn for_scroll() -> Self {
        Self::fixed(100, Duration::from_secs(1))
    }

    /// Pause before `attempt`; the first attempt goes out immediately.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            Duration::ZERO
        } else {
            self.delay
        }
    }
}

/// Determines if an error is worth another attempt.
///
/// Transport, decoding and IO failures are transient. A remote `error` field,
/// a bad config or a broken filter are not.
pub fn is_retryable_error(error: &Error) -> bool {
    matches!(error, Error::Http(_) | Error::Decode(_) | Error::Io(_))
}

/// Executes an async operation with retry logic.
///
/// Returns the result of the operation, or the last error if all retries
/// failed or the error is not retryable.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_retries + 1;
    let mut attempt = 0;

    loop {
        if attempt > 0 {
            let delay = config.delay_for_attempt(attempt);
            debug!(
                "{}: Retry attempt {}/{} after {:?}",
                operation_name, attempt, config.max_retries, delay
            );
            sleep(delay).await;
        }

        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!("{}: Succeeded after {} retries", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(e) if is_retryable_error(&e) && attempt < config.max_retries => {
                warn!(
                    "{}: Retryable error (attempt {}/{}): {}",
                    operation_name,
                    attempt + 1,
                    max_attempts,
                    e
                );
            }
            Err(e) => return Err(e),
        }
        attempt += 1;
    }
}
