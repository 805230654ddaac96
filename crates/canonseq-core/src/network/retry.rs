//! Retry with exponential backoff for calls to external services.
//!
//! Only transient failures are retried. A server-provided `Retry-After` wins
//! over the computed backoff when it is longer.

use crate::error::CanonError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first one).
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Random factor in [0.5, 1.5) applied to each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero attempts is treated as one.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `attempt + 1` (0-indexed), doubling each time.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let secs = self.base_delay.as_secs_f64() * 2f64.powi(attempt as i32);
        let capped = secs.min(self.max_delay.as_secs_f64());

        let secs = if self.jitter {
            let factor = rand::rng().random_range(0.5..1.5);
            (capped * factor).min(self.max_delay.as_secs_f64())
        } else {
            capped
        };

        Duration::from_secs_f64(secs)
    }
}

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    /// Minimum wait requested by the server, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for CanonError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            CanonError::RateLimited {
                retry_after_secs: Some(secs),
                ..
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

/// Outcome bookkeeping for one retried call.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    pub attempts: u32,
    pub total_delay: Duration,
}

/// Run `operation` until it succeeds, fails permanently, or attempts run out.
pub async fn retry_async<F, Fut, T, E>(
    config: &RetryConfig,
    label: &str,
    mut operation: F,
) -> (Result<T, E>, RetryStats)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut stats = RetryStats::default();
    let max_attempts = config.max_attempts.max(1);

    loop {
        let attempt = stats.attempts;
        stats.attempts += 1;

        let error = match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!("{} succeeded after {} attempts", label, stats.attempts);
                }
                return (Ok(value), stats);
            }
            Err(e) => e,
        };

        if !error.is_retryable() {
            debug!("{} failed permanently: {}", label, error);
            return (Err(error), stats);
        }
        if stats.attempts >= max_attempts {
            warn!(
                "{} failed after {} attempts: {}",
                label, stats.attempts, error
            );
            return (Err(error), stats);
        }

        let mut delay = config.backoff(attempt);
        if let Some(requested) = error.retry_after() {
            delay = delay.max(requested.min(config.max_delay));
        }
        stats.total_delay += delay;

        warn!(
            "{} attempt {}/{} failed: {}. Retrying in {:?}",
            label, stats.attempts, max_attempts, error, delay
        );
        tokio::time::sleep(delay).await;
    }
}
