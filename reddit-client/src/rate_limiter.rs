use postwatch_core::CoreError;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Added to the computed spacing between releases.
pub const SPACING_BUFFER: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub reset_period: Duration,
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, reset_period_seconds: u64) -> Self {
        Self {
            max_requests,
            reset_period: Duration::from_secs(reset_period_seconds),
        }
    }

    pub fn reddit_oauth() -> Self {
        Self {
            max_requests: 600,
            reset_period: Duration::from_secs(600),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::reddit_oauth()
    }
}

/// Caps concurrent upstream requests at `max_requests` and spaces each
/// acquisition at least `minimum_delay` after the oldest recorded release.
#[derive(Debug)]
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    releases: Arc<Mutex<VecDeque<Duration>>>,
    origin: Instant,
    minimum_delay: Duration,
    max_requests: u32,
}

impl RateLimiter {
    pub fn new(max_requests: u32, reset_period_seconds: u64) -> Self {
        Self::from_config(RateLimitConfig::new(max_requests, reset_period_seconds))
    }

    pub fn from_config(config: RateLimitConfig) -> Self {
        let max_requests = config.max_requests.max(1);
        let reset_seconds = config.reset_period.as_secs_f64().max(1.0);
        let minimum_delay =
            Duration::from_secs_f64(max_requests as f64 / reset_seconds) + SPACING_BUFFER;

        let releases = (0..max_requests)
            .map(|i| minimum_delay * i)
            .collect::<VecDeque<_>>();

        debug!(
            "Rate limiter created: {} permits, {:?} minimum delay",
            max_requests, minimum_delay
        );

        Self {
            semaphore: Arc::new(Semaphore::new(max_requests as usize)),
            releases: Arc::new(Mutex::new(releases)),
            origin: Instant::now(),
            minimum_delay,
            max_requests,
        }
    }

    /// Runs `action` once a permit is available and spacing allows.
    ///
    /// The release time is recorded when `action` finishes or when this
    /// future is dropped mid-flight.
    pub async fn run<F, T>(&self, cancel: &CancellationToken, action: F) -> Result<T, CoreError>
    where
        F: Future<Output = T>,
    {
        let permit = self.acquire_permit(cancel).await?;
        let output = action.await;
        drop(permit);
        Ok(output)
    }

    pub async fn acquire_permit(
        &self,
        cancel: &CancellationToken,
    ) -> Result<RateLimitPermit, CoreError> {
        let start_time = Instant::now();

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CoreError::Cancelled),
            permit = self.semaphore.clone().acquire_owned() => {
                permit.map_err(|_| CoreError::Internal {
                    message: "rate limiter semaphore closed".to_string(),
                })?
            }
        };

        let oldest = self.pop_oldest_release();
        let ready_at = oldest + self.minimum_delay;
        let now = self.origin.elapsed();

        if ready_at > now {
            let wait = ready_at - now;
            debug!("Delaying {:?} for rate limiter spacing", wait);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.restore_release(oldest);
                    return Err(CoreError::Cancelled);
                }
                _ = sleep(wait) => {}
            }
        }

        Ok(RateLimitPermit {
            _permit: permit,
            releases: Arc::clone(&self.releases),
            origin: self.origin,
            queue_wait_time: start_time.elapsed(),
        })
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn minimum_delay(&self) -> Duration {
        self.minimum_delay
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    fn pop_oldest_release(&self) -> Duration {
        let mut releases = self.releases.lock().unwrap_or_else(|e| e.into_inner());
        releases.pop_front().unwrap_or_default()
    }

    fn restore_release(&self, release: Duration) {
        let mut releases = self.releases.lock().unwrap_or_else(|e| e.into_inner());
        releases.push_front(release);
    }
}

/// Held for the duration of one upstream request. Dropping it records the
/// release time and frees the permit.
#[derive(Debug)]
pub struct RateLimitPermit {
    _permit: OwnedSemaphorePermit,
    releases: Arc<Mutex<VecDeque<Duration>>>,
    origin: Instant,
    pub queue_wait_time: Duration,
}

impl Drop for RateLimitPermit {
    fn drop(&mut self) {
        let released_at = self.origin.elapsed();
        let mut releases = self.releases.lock().unwrap_or_else(|e| e.into_inner());
        releases.push_back(released_at);
    }
}
