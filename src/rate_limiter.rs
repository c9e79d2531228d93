//! Per-client request throttling shared by all payment endpoints.
//!
//! Buckets are keyed by client identifier plus endpoint class and live in a
//! concurrent map. Check-and-increment is atomic per key via the map's entry
//! API, and stale windows are reset lazily when their key is next touched —
//! there is no background sweeper competing with live increments.

use dashmap::DashMap;
use std::fmt;
use std::time::{Duration, Instant};

use crate::errors::ServiceError;

/// Above this many live buckets, an access also drops every expired bucket.
const EVICTION_HIGH_WATER: usize = 10_000;

/// Endpoint classes with independently configured limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    Initiate,
    Complete,
    MerchantValidate,
}

impl EndpointClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointClass::Initiate => "initiate",
            EndpointClass::Complete => "complete",
            EndpointClass::MerchantValidate => "validate-merchant",
        }
    }
}

impl fmt::Display for EndpointClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    pub max_requests: u32,
    pub window: Duration,
}

#[derive(Debug)]
struct WindowBucket {
    count: u32,
    window_start: Instant,
}

impl WindowBucket {
    fn new() -> Self {
        Self {
            count: 0,
            window_start: Instant::now(),
        }
    }

    fn roll_if_expired(&mut self, window: Duration) {
        if self.window_start.elapsed() >= window {
            self.count = 0;
            self.window_start = Instant::now();
        }
    }

    fn time_until_reset(&self, window: Duration) -> Duration {
        window.saturating_sub(self.window_start.elapsed())
    }
}

#[derive(Debug)]
pub struct RateLimitDecision {
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: Duration,
}

/// Windowed counter store for the checkout endpoints.
pub struct CheckoutRateLimiter {
    buckets: DashMap<String, WindowBucket>,
    initiate: RateLimitPolicy,
    complete: RateLimitPolicy,
    merchant: RateLimitPolicy,
}

impl CheckoutRateLimiter {
    pub fn new(
        initiate: RateLimitPolicy,
        complete: RateLimitPolicy,
        merchant: RateLimitPolicy,
    ) -> Self {
        Self {
            buckets: DashMap::new(),
            initiate,
            complete,
            merchant,
        }
    }

    fn policy(&self, class: EndpointClass) -> RateLimitPolicy {
        match class {
            EndpointClass::Initiate => self.initiate,
            EndpointClass::Complete => self.complete,
            EndpointClass::MerchantValidate => self.merchant,
        }
    }

    /// Atomically checks and consumes one request slot for the client.
    ///
    /// Returns `RateLimitExceeded` with a positive retry-after once the
    /// window's budget is spent.
    pub fn check(
        &self,
        client_key: &str,
        class: EndpointClass,
    ) -> Result<RateLimitDecision, ServiceError> {
        self.evict_expired_if_crowded();

        let policy = self.policy(class);
        let key = format!("{}:{}", class, client_key);

        let mut bucket = self.buckets.entry(key).or_insert_with(WindowBucket::new);
        bucket.roll_if_expired(policy.window);

        if bucket.count >= policy.max_requests {
            let retry_after_secs = bucket.time_until_reset(policy.window).as_secs().max(1);
            return Err(ServiceError::RateLimitExceeded { retry_after_secs });
        }

        bucket.count += 1;
        Ok(RateLimitDecision {
            limit: policy.max_requests,
            remaining: policy.max_requests.saturating_sub(bucket.count),
            reset_after: bucket.time_until_reset(policy.window),
        })
    }

    /// Drops buckets whose window has fully elapsed, but only when the map has
    /// grown enough for them to matter. Runs on the accessing task, never in a
    /// background sweeper.
    fn evict_expired_if_crowded(&self) {
        if self.buckets.len() < EVICTION_HIGH_WATER {
            return;
        }
        let max_window = self
            .initiate
            .window
            .max(self.complete.window)
            .max(self.merchant.window);
        self.buckets
            .retain(|_, bucket| bucket.window_start.elapsed() < max_window);
    }

    #[cfg(test)]
    fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: u32, window_secs: u64) -> CheckoutRateLimiter {
        let policy = RateLimitPolicy {
            max_requests: max,
            window: Duration::from_secs(window_secs),
        };
        CheckoutRateLimiter::new(policy, policy, policy)
    }

    #[test]
    fn allows_up_to_limit_then_rejects() {
        let limiter = limiter(2, 60);

        assert!(limiter.check("client-1", EndpointClass::Initiate).is_ok());
        assert!(limiter.check("client-1", EndpointClass::Initiate).is_ok());

        let err = limiter
            .check("client-1", EndpointClass::Initiate)
            .unwrap_err();
        match err {
            ServiceError::RateLimitExceeded { retry_after_secs } => {
                assert!(retry_after_secs >= 1);
            }
            other => panic!("expected RateLimitExceeded, got {:?}", other),
        }
    }

    #[test]
    fn different_clients_have_separate_budgets() {
        let limiter = limiter(1, 60);

        assert!(limiter.check("client-a", EndpointClass::Initiate).is_ok());
        assert!(limiter.check("client-b", EndpointClass::Initiate).is_ok());
        assert!(limiter.check("client-a", EndpointClass::Initiate).is_err());
        assert!(limiter.check("client-b", EndpointClass::Initiate).is_err());
    }

    #[test]
    fn endpoint_classes_do_not_share_budgets() {
        let limiter = limiter(1, 60);

        assert!(limiter.check("client-a", EndpointClass::Initiate).is_ok());
        assert!(limiter.check("client-a", EndpointClass::Complete).is_ok());
        assert!(limiter
            .check("client-a", EndpointClass::MerchantValidate)
            .is_ok());
        assert!(limiter.check("client-a", EndpointClass::Initiate).is_err());
    }

    #[test]
    fn remaining_counts_down() {
        let limiter = limiter(3, 60);

        let first = limiter.check("c", EndpointClass::Complete).unwrap();
        assert_eq!(first.limit, 3);
        assert_eq!(first.remaining, 2);
        let second = limiter.check("c", EndpointClass::Complete).unwrap();
        assert_eq!(second.remaining, 1);
    }

    #[tokio::test]
    async fn expired_window_resets_lazily_on_access() {
        let limiter = limiter(1, 1);

        assert!(limiter.check("c", EndpointClass::Initiate).is_ok());
        assert!(limiter.check("c", EndpointClass::Initiate).is_err());

        tokio::time::sleep(Duration::from_millis(1100)).await;

        // No sweeper ran; the stale window rolls over on this access.
        assert!(limiter.check("c", EndpointClass::Initiate).is_ok());
        assert_eq!(limiter.bucket_count(), 1);
    }

    #[test]
    fn concurrent_checks_never_exceed_limit() {
        use std::sync::Arc;

        let limiter = Arc::new(limiter(10, 60));
        let mut handles = Vec::new();
        for _ in 0..40 {
            let limiter = limiter.clone();
            handles.push(std::thread::spawn(move || {
                limiter.check("shared", EndpointClass::Initiate).is_ok()
            }));
        }
        let granted = handles
            .into_iter()
            .map(|h| h.join().expect("thread panicked"))
            .filter(|allowed| *allowed)
            .count();
        assert_eq!(granted, 10);
    }
}
