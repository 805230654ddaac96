//! Per-service token buckets.
//!
//! Every outbound call to an external service takes one token from that
//! service's bucket first. Buckets start full, so a cold start may spend the
//! whole burst at once before settling to the sustained rate.

use crate::config::RateLimitSettings;
use crate::error::{CanonError, Result};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

struct ServiceLimiter {
    limiter: DefaultDirectRateLimiter,
    settings: RateLimitSettings,
    acquired: AtomicU64,
    waited_micros: AtomicU64,
}

/// Usage of one service's bucket.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStats {
    pub service: String,
    pub requests_per_second: f64,
    pub burst: u32,
    pub acquired: u64,
    pub total_wait: Duration,
}

/// Registry of token buckets keyed by service name.
///
/// Services without a bucket are not limited.
#[derive(Default)]
pub struct RateLimiters {
    services: HashMap<String, ServiceLimiter>,
}

impl std::fmt::Debug for RateLimiters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiters")
            .field("services", &self.services.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RateLimiters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &BTreeMap<String, RateLimitSettings>) -> Result<Self> {
        settings
            .iter()
            .try_fold(Self::new(), |limiters, (service, limit)| {
                limiters.with_service(service.as_str(), *limit)
            })
    }

    /// Add or replace the bucket for `service`.
    pub fn with_service(mut self, service: impl Into<String>, settings: RateLimitSettings) -> Result<Self> {
        let service = service.into();
        let invalid = |message: &str| CanonError::Validation {
            field: format!("rate_limits.{}", service),
            message: message.to_string(),
        };

        if !(settings.requests_per_second.is_finite() && settings.requests_per_second > 0.0) {
            return Err(invalid("requests_per_second must be positive"));
        }
        let period = Duration::from_secs_f64(1.0 / settings.requests_per_second);
        let burst = NonZeroU32::new(settings.effective_burst())
            .ok_or_else(|| invalid("burst must be at least 1"))?;
        let quota = Quota::with_period(period)
            .ok_or_else(|| invalid("rate is too high"))?
            .allow_burst(burst);

        debug!(
            "Rate limit for {}: {}/s, burst {}",
            service, settings.requests_per_second, burst
        );

        self.services.insert(
            service,
            ServiceLimiter {
                limiter: RateLimiter::direct(quota),
                settings,
                acquired: AtomicU64::new(0),
                waited_micros: AtomicU64::new(0),
            },
        );
        Ok(self)
    }

    /// Wait until a token for `service` is available and take it.
    pub async fn acquire(&self, service: &str) {
        let Some(entry) = self.services.get(service) else {
            return;
        };

        let started = Instant::now();
        entry.limiter.until_ready().await;
        let waited = started.elapsed();

        entry.acquired.fetch_add(1, Ordering::Relaxed);
        entry
            .waited_micros
            .fetch_add(waited.as_micros() as u64, Ordering::Relaxed);
        if waited > Duration::from_millis(1) {
            trace!("Waited {:?} for a {} token", waited, service);
        }
    }

    pub fn stats(&self) -> Vec<RateLimitStats> {
        let mut stats: Vec<_> = self
            .services
            .iter()
            .map(|(service, entry)| RateLimitStats {
                service: service.clone(),
                requests_per_second: entry.settings.requests_per_second,
                burst: entry.settings.effective_burst(),
                acquired: entry.acquired.load(Ordering::Relaxed),
                total_wait: Duration::from_micros(entry.waited_micros.load(Ordering::Relaxed)),
            })
            .collect();
        stats.sort_by(|a, b| a.service.cmp(&b.service));
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_burst_then_sustained_rate() {
        let limiters = RateLimiters::new()
            .with_service("ncbi", RateLimitSettings::new(20.0).with_burst(1))
            .unwrap();

        let started = Instant::now();
        for _ in 0..3 {
            limiters.acquire("ncbi").await;
        }

        // First token is immediate, the next two each wait one 50ms period.
        assert!(started.elapsed() >= Duration::from_millis(90));
        assert_eq!(limiters.stats()[0].acquired, 3);
    }

    #[tokio::test]
    async fn test_full_bucket_is_immediate() {
        let limiters = RateLimiters::new()
            .with_service("uniprot", RateLimitSettings::new(1.0).with_burst(5))
            .unwrap();

        let started = Instant::now();
        for _ in 0..5 {
            limiters.acquire("uniprot").await;
        }
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(limiters.stats()[0].total_wait < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_unknown_service_unlimited() {
        let limiters = RateLimiters::new();
        let started = Instant::now();
        for _ in 0..100 {
            limiters.acquire("ensembl").await;
        }
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(limiters.stats().is_empty());
    }

    #[tokio::test]
    async fn test_services_are_independent() {
        let limiters = RateLimiters::new()
            .with_service("ncbi", RateLimitSettings::new(5.0).with_burst(1))
            .unwrap()
            .with_service("uniprot", RateLimitSettings::new(5.0).with_burst(1))
            .unwrap();

        limiters.acquire("ncbi").await;
        let started = Instant::now();
        limiters.acquire("uniprot").await;
        assert!(started.elapsed() < Duration::from_millis(100));

        limiters.acquire("ncbi").await;
        assert!(started.elapsed() >= Duration::from_millis(150));
    }

    #[test]
    fn test_invalid_rate_rejected() {
        assert!(RateLimiters::new()
            .with_service("ncbi", RateLimitSettings::new(0.0))
            .is_err());
    }

    #[test]
    fn test_default_burst_is_twice_rate() {
        let limiters = RateLimiters::from_settings(&BTreeMap::from([(
            "ncbi".to_string(),
            RateLimitSettings::new(3.0),
        )]))
        .unwrap();
        assert_eq!(limiters.stats()[0].burst, 6);
    }
}
