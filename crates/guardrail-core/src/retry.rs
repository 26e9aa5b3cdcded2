use crate::config::DeploymentSettings;
use crate::error::{GuardrailError, Result};
use std::future::Future;
use std::time::Duration;

/// Fixed-backoff retry for transient control-plane failures.
///
/// `max_retries` counts retries after the first attempt, so the total number
/// of attempts is `max_retries + 1`. Attempts are 1-indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl From<&DeploymentSettings> for RetryPolicy {
    fn from(settings: &DeploymentSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            backoff: settings.retry_backoff(),
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts are exhausted. Returns the last result and the attempt count.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> (Result<T>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_retries.saturating_add(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return (Ok(value), attempt),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    tracing::warn!(
                        what,
                        attempt,
                        max_attempts,
                        error = %e,
                        "transient failure, retrying"
                    );
                    if !self.backoff.is_zero() {
                        tokio::time::sleep(self.backoff).await;
                    }
                    attempt += 1;
                }
                Err(e) => return (Err(e), attempt),
            }
        }
    }
}

/// Await `fut` for at most `limit`. Exceeding the limit is a transient failure.
pub async fn bounded<T, Fut>(limit: Duration, what: &str, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(GuardrailError::Transient(format!(
            "{what} timed out after {}s",
            limit.as_secs()
        ))),
    }
}
