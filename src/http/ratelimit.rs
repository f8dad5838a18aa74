//! Per-IP token-bucket rate limiting.
//!
//! Two instances run in parallel: a strict limiter on the submit
//! endpoint and a permissive one on status polling. Each visitor gets a
//! bucket refilled at `requests_per_minute / 60` tokens per second up to
//! `burst`; a background task garbage-collects buckets idle longer than
//! the cleanup interval.
//!
//! The visitor map is a [`DashMap`]; bucket state sits behind a plain
//! mutex that is never held across an await.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{connect_info::ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::client_ip::client_ip;
use super::handlers::ApiError;

/// Rate limiter settings.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    /// Sustained admission rate per visitor.
    pub requests_per_minute: u32,
    /// Bucket capacity; also the initial balance for a new visitor.
    pub burst: u32,
    /// Idle threshold after which a visitor bucket is collected.
    pub cleanup_interval: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 5,
            burst: 2,
            cleanup_interval: Duration::from_secs(10 * 60),
        }
    }
}

/// One visitor's bucket.
#[derive(Debug)]
struct Visitor {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

/// Per-IP token-bucket limiter.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    visitors: DashMap<String, Arc<std::sync::Mutex<Visitor>>>,
}

impl RateLimiter {
    /// Creates a limiter with the given settings.
    #[must_use]
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            visitors: DashMap::new(),
        }
    }

    /// Takes one token for `ip`, creating the bucket on first sight.
    /// Returns false when the bucket is empty.
    pub fn allow(&self, ip: &str) -> bool {
        let now = Instant::now();
        let burst = f64::from(self.config.burst.max(1));

        let state = self
            .visitors
            .entry(ip.to_string())
            .or_insert_with(|| {
                Arc::new(std::sync::Mutex::new(Visitor {
                    tokens: burst,
                    last_refill: now,
                    last_seen: now,
                }))
            })
            .clone();

        let mut visitor = state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let rate_per_second = f64::from(self.config.requests_per_minute) / 60.0;
        let elapsed = now.duration_since(visitor.last_refill).as_secs_f64();
        visitor.tokens = (visitor.tokens + elapsed * rate_per_second).min(burst);
        visitor.last_refill = now;
        visitor.last_seen = now;

        if visitor.tokens >= 1.0 {
            visitor.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Number of tracked visitors.
    #[must_use]
    pub fn visitor_count(&self) -> usize {
        self.visitors.len()
    }

    /// Drops buckets idle longer than the cleanup interval.
    fn cleanup(&self) {
        let threshold = self.config.cleanup_interval;
        let before = self.visitors.len();

        self.visitors.retain(|_, state| {
            state
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .last_seen
                .elapsed()
                < threshold
        });

        let removed = before.saturating_sub(self.visitors.len());
        if removed > 0 {
            debug!(removed, remaining = self.visitors.len(), "rate limiter cleanup");
        }
    }

    /// Spawns the periodic bucket GC, running until `cancel`.
    pub fn start_cleanup(self: &Arc<Self>, cancel: &CancellationToken) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        let cancel = cancel.clone();
        let period = limiter.config.cleanup_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => limiter.cleanup(),
                }
            }
        })
    }
}

/// Axum middleware enforcing a limiter on the wrapped routes.
pub async fn middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let socket = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let ip = client_ip(request.headers(), socket);

    if limiter.allow(&ip) {
        next.run(request).await
    } else {
        warn!(%ip, path = %request.uri().path(), "rate limit exceeded");
        ApiError::rate_limited().into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn limiter(rpm: u32, burst: u32) -> RateLimiter {
        RateLimiter::new(RateLimiterConfig {
            requests_per_minute: rpm,
            burst,
            cleanup_interval: Duration::from_millis(50),
        })
    }

    #[tokio::test]
    async fn test_burst_admitted_then_rejected() {
        let limiter = limiter(5, 2);

        assert!(limiter.allow("1.2.3.4"));
        assert!(limiter.allow("1.2.3.4"));
        assert!(!limiter.allow("1.2.3.4"), "third immediate request rejected");
    }

    #[tokio::test]
    async fn test_independent_buckets_per_ip() {
        let limiter = limiter(5, 1);

        assert!(limiter.allow("1.1.1.1"));
        assert!(limiter.allow("2.2.2.2"));
        assert!(!limiter.allow("1.1.1.1"));
        assert!(!limiter.allow("2.2.2.2"));
        assert_eq!(limiter.visitor_count(), 2);
    }

    #[tokio::test]
    async fn test_tokens_refill_over_time() {
        tokio::time::pause();
        let limiter = limiter(60, 1); // one token per second

        assert!(limiter.allow("1.2.3.4"));
        assert!(!limiter.allow("1.2.3.4"));

        tokio::time::advance(Duration::from_millis(1100)).await;
        assert!(limiter.allow("1.2.3.4"), "bucket refills at 1/s");
    }

    #[tokio::test]
    async fn test_sustained_rate_bounded_by_rate_plus_burst() {
        tokio::time::pause();
        let limiter = limiter(60, 5);

        // One minute of hammering at 10 req/s.
        let mut admitted = 0;
        for _ in 0..600 {
            if limiter.allow("9.9.9.9") {
                admitted += 1;
            }
            tokio::time::advance(Duration::from_millis(100)).await;
        }

        // At 60 rpm + burst 5 no more than ~66 may pass.
        assert!(admitted <= 66, "admitted {admitted} over a minute");
        assert!(admitted >= 60, "refill should sustain the base rate");
    }

    #[tokio::test]
    async fn test_cleanup_drops_idle_buckets() {
        let limiter = Arc::new(limiter(5, 2));
        assert!(limiter.allow("1.2.3.4"));
        assert_eq!(limiter.visitor_count(), 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        limiter.cleanup();
        assert_eq!(limiter.visitor_count(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_task_stops_on_cancel() {
        let limiter = Arc::new(limiter(5, 2));
        let cancel = CancellationToken::new();
        let handle = limiter.start_cleanup(&cancel);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
