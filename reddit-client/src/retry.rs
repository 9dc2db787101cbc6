use postwatch_core::{CoreError, RedditApiError};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Linear backoff for transient upstream failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts allowed before giving up
    pub max_retries: u32,
    /// Delay added per failed attempt
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            backoff_step: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_step: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            backoff_step,
        }
    }

    /// Delay after the `retries`-th consecutive failure.
    pub fn delay_for(&self, retries: u32) -> Duration {
        self.backoff_step * retries
    }

    pub fn is_transient(error: &CoreError) -> bool {
        matches!(error, CoreError::RedditApi(RedditApiError::Transient { .. }))
    }

    /// Sleeps the backoff for `retries`, or returns `Cancelled`.
    pub async fn backoff(&self, retries: u32, cancel: &CancellationToken) -> Result<(), CoreError> {
        let delay = self.delay_for(retries);
        debug!("Backing off {:?} before retry {}", delay, retries + 1);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CoreError::Cancelled),
            _ = sleep(delay) => Ok(()),
        }
    }

    /// Runs `operation` until it succeeds, fails with a non-transient
    /// error, or the retry budget is spent.
    pub async fn execute<F, Fut, T>(
        &self,
        operation_name: &str,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, CoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let mut retries = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if Self::is_transient(&error) => {
                    retries += 1;
                    if retries >= self.max_retries {
                        warn!(
                            "{} failed after {} attempts: {}",
                            operation_name, retries, error
                        );
                        return Err(RedditApiError::RetriesExhausted {
                            attempts: retries,
                            last_error: error.to_string(),
                        }
                        .into());
                    }
                    warn!(
                        "{} attempt {} failed transiently: {}",
                        operation_name, retries, error
                    );
                    self.backoff(retries, cancel).await?;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
