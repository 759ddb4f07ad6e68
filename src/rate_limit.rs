//! Request pacing for NCBI E-utilities.
//!
//! NCBI allows 3 requests per second per IP without an API key and 10 with
//! one. Exceeding that returns HTTP 429 for every caller sharing the key, so
//! all clones of a [`crate::PubMedClient`] share one limiter.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

/// Requests per second allowed without an API key.
pub const ANONYMOUS_RATE: f64 = 3.0;
/// Requests per second allowed with an API key.
pub const KEYED_RATE: f64 = 10.0;

/// Minimum-interval rate limiter shared by all clones.
///
/// Also watches the `X-RateLimit-Remaining` header NCBI sends and pauses for
/// a full window once the server reports the quota is spent.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<RateLimiterInner>>,
}

#[derive(Debug)]
struct RateLimiterInner {
    min_interval: Duration,
    last_request: Option<Instant>,
    /// Set when the server reported zero remaining requests.
    blocked_until: Option<Instant>,
}

impl RateLimiter {
    /// Create a limiter allowing `max_per_second` requests per second.
    ///
    /// Non-positive rates disable local pacing.
    pub fn new(max_per_second: f64) -> Self {
        let min_interval = if max_per_second > 0.0 && max_per_second.is_finite() {
            Duration::from_secs_f64(1.0 / max_per_second)
        } else {
            Duration::ZERO
        };
        Self {
            inner: Arc::new(Mutex::new(RateLimiterInner {
                min_interval,
                last_request: None,
                blocked_until: None,
            })),
        }
    }

    /// Limiter matching NCBI's published policy for the given key state.
    pub fn for_ncbi(has_api_key: bool) -> Self {
        Self::new(if has_api_key { KEYED_RATE } else { ANONYMOUS_RATE })
    }

    /// Wait until a request is allowed, then mark it as sent.
    ///
    /// The lock is held while waiting, so concurrent callers are released
    /// one interval apart.
    pub async fn acquire(&self) {
        let mut inner = self.inner.lock().await;
        loop {
            let next_slot = inner.last_request.map(|last| last + inner.min_interval);
            let ready_at = match (inner.blocked_until, next_slot) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
            match ready_at {
                Some(at) if at > Instant::now() => tokio::time::sleep_until(at).await,
                _ => break,
            }
        }
        inner.blocked_until = None;
        inner.last_request = Some(Instant::now());
    }

    /// Update the limiter from E-utilities response headers.
    pub async fn update_from_headers(&self, headers: &reqwest::header::HeaderMap) {
        let remaining = headers
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u32>().ok());

        if remaining == Some(0) {
            let mut inner = self.inner.lock().await;
            inner.blocked_until = Some(Instant::now() + Duration::from_secs(1));
            tracing::debug!("NCBI reported an exhausted rate window, pausing requests");
        }
    }

    /// Pause all requests for `wait`, e.g. after a 429 with `Retry-After`.
    pub async fn back_off(&self, wait: Duration) {
        let mut inner = self.inner.lock().await;
        let until = Instant::now() + wait;
        inner.blocked_until = Some(match inner.blocked_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    #[tokio::test]
    async fn test_rate_limiter_basic() {
        let limiter = RateLimiter::new(100.0); // 10ms interval
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;

        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[tokio::test]
    async fn test_rate_limiter_first_request_immediate() {
        let limiter = RateLimiter::for_ncbi(false);
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_exhausted_header_blocks_next_request() {
        let limiter = RateLimiter::new(0.0);
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        limiter.update_from_headers(&headers).await;

        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test]
    async fn test_back_off_keeps_longest_pause() {
        let limiter = RateLimiter::new(0.0);
        limiter.back_off(Duration::from_millis(80)).await;
        limiter.back_off(Duration::from_millis(10)).await;

        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_concurrent_callers_stay_spaced() {
        let limiter = RateLimiter::new(20.0); // 50ms interval
        limiter.acquire().await;
        let start = Instant::now();

        let a = limiter.clone();
        let b = limiter.clone();
        let (first, second) = tokio::join!(
            async move {
                a.acquire().await;
                start.elapsed()
            },
            async move {
                b.acquire().await;
                start.elapsed()
            }
        );

        let (early, late) = if first <= second { (first, second) } else { (second, first) };
        assert!(early >= Duration::from_millis(40));
        assert!(late >= Duration::from_millis(90), "second caller released after {late:?}");
    }
}
