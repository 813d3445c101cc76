//! Shared admission control for REST calls and gateway frames.
//!
//! Every domain is guarded by its own lock, so calls on different resources never
//! wait on each other. Per resource buckets and the global lockout only follow
//! what the server reported; the gateway and presence windows are local caps.

mod bucket;
mod window;

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, SystemTime},
};

use tokio::time::Instant;

use bucket::{Bucket, GlobalLockout};
use window::SlidingWindow;

use crate::config::RateLimitConfig;

// longest wait recorded from a server signal
const MAX_WAIT: Duration = Duration::from_secs(86400);

fn deadline(now: Instant, wait: Duration) -> Instant {
    now.checked_add(wait.min(MAX_WAIT)).unwrap_or(now)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Rate limiter shared by the REST channel and the gateway connection
#[derive(Debug)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
    global: Mutex<GlobalLockout>,
    gateway_frames: Mutex<SlidingWindow>,
    presence_updates: Mutex<SlidingWindow>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(&RateLimitConfig::default())
    }
}

impl RateLimiter {
    /// Create a limiter with given local caps
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            buckets: Mutex::default(),
            global: Mutex::default(),
            gateway_frames: Mutex::new(SlidingWindow::new(config.gateway_frames, config.window)),
            presence_updates: Mutex::new(SlidingWindow::new(
                config.presence_updates,
                config.window,
            )),
        }
    }

    /// Time to wait before calling an endpoint of resource `key`, zero means go.
    ///
    /// This is advisory: callers sleep the returned duration then check again.
    pub fn check_limit(&self, key: &str) -> Duration {
        let now = Instant::now();

        let global = lock(&self.global).wait(now);
        if !global.is_zero() {
            return global;
        }

        lock(&self.buckets)
            .get(key)
            .map(|bucket| bucket.wait(now))
            .unwrap_or_default()
    }

    /// Record bucket state reported by response headers, `reset_at` is wall clock time.
    pub fn update_limit(&self, key: &str, reset_at: SystemTime, remaining: u32) {
        let reset_after = reset_at
            .duration_since(SystemTime::now())
            .unwrap_or_default();
        self.update_limit_after(key, reset_after, remaining)
    }

    /// Record bucket state where reset time is given relative to now.
    pub fn update_limit_after(&self, key: &str, reset_after: Duration, remaining: u32) {
        let bucket = Bucket {
            reset_at: deadline(Instant::now(), reset_after),
            remaining,
        };

        log::trace!("Update rate limit bucket {}: {:?}", key, bucket);

        lock(&self.buckets).insert(key.to_string(), bucket);
    }

    /// Record a non-global 429 on resource `key`
    pub fn update_limit_retry(&self, key: &str, retry_after: Duration) {
        log::debug!("Bucket {} rate limited, retry after {:?}", key, retry_after);
        self.update_limit_after(key, retry_after, 0)
    }

    /// Record a globally flagged 429, blocks every resource until it expires
    pub fn global_limit_exceeded(&self, retry_after: Duration) {
        log::warn!("Global rate limit exceeded, retry after {:?}", retry_after);
        lock(&self.global).extend(deadline(Instant::now(), retry_after));
    }

    /// Admit one outbound gateway frame, or return time to wait
    pub fn check_gateway_frame_limit(&self) -> Duration {
        lock(&self.gateway_frames).check(Instant::now())
    }

    /// Admit one presence update, or return time to wait
    pub fn check_presence_update_limit(&self) -> Duration {
        lock(&self.presence_updates).check(Instant::now())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn assert_about(actual: Duration, expected: Duration) {
        let diff = if actual > expected {
            actual - expected
        } else {
            expected - actual
        };
        assert!(
            diff <= Duration::from_millis(100),
            "expected about {:?}, got {:?}",
            expected,
            actual
        );
    }

    #[test]
    fn test_unknown_bucket_is_free() {
        let limiter = RateLimiter::default();
        assert_eq!(limiter.check_limit("channels/1"), Duration::ZERO);
    }

    #[test]
    fn test_exhausted_bucket_waits_until_reset() {
        let limiter = RateLimiter::default();
        let reset_at = SystemTime::now() + Duration::from_millis(5000);

        limiter.update_limit("channels/1", reset_at, 0);
        assert_about(limiter.check_limit("channels/1"), Duration::from_millis(5000));

        limiter.update_limit("channels/1", reset_at, 3);
        assert_eq!(limiter.check_limit("channels/1"), Duration::ZERO);
    }

    #[test]
    fn test_bucket_does_not_block_other_resources() {
        let limiter = RateLimiter::default();
        limiter.update_limit_retry("channels/1", Duration::from_secs(3));

        assert_about(limiter.check_limit("channels/1"), Duration::from_secs(3));
        assert_eq!(limiter.check_limit("channels/2"), Duration::ZERO);
    }

    #[test]
    fn test_global_lockout_dominates_every_bucket() {
        let limiter = RateLimiter::default();
        limiter.update_limit_after("guilds/1", Duration::from_secs(10), 5);

        limiter.global_limit_exceeded(Duration::from_millis(2000));

        assert_about(limiter.check_limit("guilds/1"), Duration::from_millis(2000));
        assert_about(
            limiter.check_limit("users/@me"),
            Duration::from_millis(2000),
        );
    }

    #[test]
    fn test_huge_waits_are_clamped() {
        let limiter = RateLimiter::default();

        limiter.update_limit_after("channels/1", Duration::MAX, 0);
        assert_about(limiter.check_limit("channels/1"), MAX_WAIT);

        limiter.global_limit_exceeded(Duration::MAX);
        assert_about(limiter.check_limit("users/@me"), MAX_WAIT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gateway_frame_limit() {
        let limiter = RateLimiter::default();

        for _ in 0..90 {
            assert_eq!(limiter.check_gateway_frame_limit(), Duration::ZERO);
            tokio::time::advance(Duration::from_millis(10)).await;
        }

        assert!(limiter.check_gateway_frame_limit() > Duration::ZERO);

        tokio::time::advance(Duration::from_secs(60) + Duration::from_millis(1)).await;

        assert_eq!(limiter.check_gateway_frame_limit(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_presence_limit_is_independent_of_frame_limit() {
        let limiter = RateLimiter::default();

        for _ in 0..5 {
            assert_eq!(limiter.check_presence_update_limit(), Duration::ZERO);
        }
        assert!(limiter.check_presence_update_limit() > Duration::ZERO);
        assert_eq!(limiter.check_gateway_frame_limit(), Duration::ZERO);
    }
}
