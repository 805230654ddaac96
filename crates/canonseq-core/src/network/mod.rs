//! Network utilities for calls to external services.
//!
//! This module provides:
//! - HTTP client with status mapping
//! - Retry logic with exponential backoff and jitter
//! - Per-service token bucket rate limiting

mod client;
mod rate_limit;
mod retry;

pub use client::{build_url, extract_domain, HttpClient};
pub use rate_limit::{RateLimitStats, RateLimiters};
pub use retry::{retry_async, RetryConfig, RetryStats, Retryable};
