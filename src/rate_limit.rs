use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::Quota;
use rand::Rng;

type DirectLimiter = governor::RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Minimum spacing between requests to one site, with an optional random
/// extra delay on top. A burst of one: consecutive calls never bunch up.
///
/// Shared by reference between search paging and detail fetches.
pub struct RateLimiter {
    min_interval: Duration,
    jitter_pct: u8,
    limiter: Option<DirectLimiter>,
    requests: AtomicU64,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        let limiter = Quota::with_period(min_interval)
            .map(|q| governor::RateLimiter::direct(q.allow_burst(NonZeroU32::MIN)));
        Self {
            min_interval,
            jitter_pct: 0,
            limiter,
            requests: AtomicU64::new(0),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Add up to `pct` percent of the interval, chosen at random per request.
    pub fn with_jitter(mut self, pct: u8) -> Self {
        self.jitter_pct = pct.min(100);
        self
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until the next request may go out.
    pub async fn wait(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let Some(limiter) = &self.limiter else {
            return;
        };
        limiter.until_ready().await;
        let extra = self.jitter();
        if !extra.is_zero() {
            tokio::time::sleep(extra).await;
        }
    }

    fn jitter(&self) -> Duration {
        if self.jitter_pct == 0 {
            return Duration::ZERO;
        }
        let max_ms = self.min_interval.as_millis() as u64 * u64::from(self.jitter_pct) / 100;
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}
