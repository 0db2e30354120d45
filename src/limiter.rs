//! Rate limiting seam for the query executor.
//!
//! The executor only ever asks `is_allowed(key)`. How calls are counted
//! (sliding window, shared counter in Redis, ...) is owned by the limiter.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;
use tracing::debug;

/// Default width of the time bucket folded into rate-limit keys
pub const DEFAULT_BUCKET_MS: u64 = 1_000;

/// Checks between sweeps of idle keys in `SlidingWindowLimiter`
pub const SWEEP_INTERVAL: usize = 64;

/// Decides whether a call identified by `key` may proceed
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Record the call and report whether it is within the limit
    async fn is_allowed(&self, key: &str) -> bool;
}

/// Derive the limiter key for a call site at a point in time
///
/// The key is the context followed by the index of the `bucket`-wide time
/// slice `now` falls into, so calls in the same slice share a key.
#[must_use]
pub fn rate_limit_key(context: &str, now: SystemTime, bucket: Duration) -> String {
    let since_epoch = now.duration_since(UNIX_EPOCH).unwrap_or_default();
    let bucket_ms = bucket.as_millis().max(1);
    format!("{context}:{}", since_epoch.as_millis() / bucket_ms)
}

/// In-process sliding-window limiter
///
/// Allows at most `max_requests` calls per key within any `window`.
/// Keys rotate with every time bucket, so keys whose calls have all left the
/// window are swept every `SWEEP_INTERVAL` checks.
pub struct SlidingWindowLimiter {
    max_requests: usize,
    window: Duration,
    state: Mutex<WindowState>,
}

#[derive(Default)]
struct WindowState {
    calls: HashMap<String, VecDeque<Instant>>,
    checks_since_sweep: usize,
}

impl WindowState {
    fn sweep(&mut self, now: Instant, window: Duration) -> usize {
        let before = self.calls.len();
        self.calls.retain(|_, stamps| {
            evict_expired(stamps, now, window);
            !stamps.is_empty()
        });
        self.checks_since_sweep = 0;
        before - self.calls.len()
    }
}

impl SlidingWindowLimiter {
    /// Create a limiter allowing `max_requests` per `window`
    #[must_use]
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            state: Mutex::new(WindowState::default()),
        }
    }

    /// Drop keys whose calls have all left the window
    ///
    /// Returns the number of keys removed.
    pub fn prune(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sweep(Instant::now(), self.window)
    }

    /// Number of keys currently tracked
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .calls
            .len()
    }

    fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        state.checks_since_sweep += 1;
        if state.checks_since_sweep >= SWEEP_INTERVAL {
            let removed = state.sweep(now, self.window);
            if removed > 0 {
                debug!("Swept {removed} idle rate-limit keys");
            }
        }

        let stamps = state.calls.entry(key.to_string()).or_default();
        evict_expired(stamps, now, self.window);

        if stamps.len() < self.max_requests {
            stamps.push_back(now);
            true
        } else {
            debug!("Key {key} has {} calls in window", stamps.len());
            false
        }
    }
}

fn evict_expired(stamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(front) = stamps.front() {
        if now.duration_since(*front) >= window {
            stamps.pop_front();
        } else {
            break;
        }
    }
}

#[async_trait]
impl RateLimiter for SlidingWindowLimiter {
    async fn is_allowed(&self, key: &str) -> bool {
        self.check(key)
    }
}

/// Limiter that admits every call
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLimiter;

#[async_trait]
impl RateLimiter for NoopLimiter {
    async fn is_allowed(&self, _key: &str) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_rate_limit_key_buckets() {
        let at = |ms: u64| UNIX_EPOCH + Duration::from_millis(ms);
        let bucket = Duration::from_millis(1000);

        assert_eq!(rate_limit_key("fetch_countries", at(12_345), bucket), "fetch_countries:12");
        assert_eq!(
            rate_limit_key("fetch_countries", at(12_000), bucket),
            rate_limit_key("fetch_countries", at(12_999), bucket)
        );
        assert_ne!(
            rate_limit_key("fetch_countries", at(12_999), bucket),
            rate_limit_key("fetch_countries", at(13_000), bucket)
        );
    }

    #[test]
    fn test_rate_limit_key_zero_bucket() {
        let now = UNIX_EPOCH + Duration::from_millis(42);
        assert_eq!(rate_limit_key("save", now, Duration::ZERO), "save:42");
    }

    #[tokio::test]
    async fn test_sliding_window_limits_per_key() {
        let limiter = SlidingWindowLimiter::new(2, Duration::from_secs(60));

        assert!(limiter.is_allowed("a").await);
        assert!(limiter.is_allowed("a").await);
        assert!(!limiter.is_allowed("a").await);

        // Other keys are counted independently
        assert!(limiter.is_allowed("b").await);
        assert_eq!(limiter.tracked_keys(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sliding_window_recovers_after_window() {
        let limiter = SlidingWindowLimiter::new(1, Duration::from_millis(500));

        assert!(limiter.is_allowed("k").await);
        assert!(!limiter.is_allowed("k").await);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(limiter.is_allowed("k").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_removes_idle_keys() {
        let limiter = SlidingWindowLimiter::new(5, Duration::from_millis(100));
        assert!(limiter.is_allowed("old").await);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(limiter.is_allowed("fresh").await);

        assert_eq!(limiter.prune(), 1);
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_keys_swept_without_prune() {
        let limiter = SlidingWindowLimiter::new(5, Duration::from_millis(50));

        // One key per bucket, each idle by the time the next is checked
        for bucket in 0..200 {
            assert!(limiter.is_allowed(&format!("fetch_countries:{bucket}")).await);
            tokio::time::sleep(Duration::from_millis(60)).await;
        }

        assert!(limiter.tracked_keys() <= SWEEP_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_keeps_active_keys() {
        let limiter = SlidingWindowLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.is_allowed("hot").await);

        for bucket in 0..SWEEP_INTERVAL {
            limiter.is_allowed(&format!("cold:{bucket}")).await;
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        // Still inside its window, so the sweep must not forget it
        assert!(!limiter.is_allowed("hot").await);
    }

    #[tokio::test]
    async fn test_concurrent_checks_never_exceed_limit() {
        let limiter = Arc::new(SlidingWindowLimiter::new(10, Duration::from_secs(60)));

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move { limiter.is_allowed("shared").await })
            })
            .collect();

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 10);
    }

    #[tokio::test]
    async fn test_noop_limiter_allows_everything() {
        let limiter = NoopLimiter;
        for _ in 0..100 {
            assert!(limiter.is_allowed("any").await);
        }
    }
}
