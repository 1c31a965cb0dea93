//! Fixed-window limiter over the shared counter store

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{RateLimitPolicy, RouteClass};
use crate::counter::CounterStore;

/// Outcome of an admission check
#[derive(Debug, Clone)]
pub struct Admission {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
    /// Time until the window closes (Retry-After when rejected)
    pub reset_in: Duration,
    /// The counter store could not be consulted and the request was let through
    pub degraded: bool,
}

impl Admission {
    /// Seconds until the window resets, rounded up
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.reset_in.as_secs();
        if self.reset_in.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }
}

/// Admits or rejects requests per (route class, identity)
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    overrides: HashMap<RouteClass, RateLimitPolicy>,
    key_prefix: String,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            overrides: HashMap::new(),
            key_prefix: "ratelimit".to_string(),
        }
    }

    /// Replace the quota for one class (tests and load drills)
    pub fn with_policy(mut self, class: RouteClass, policy: RateLimitPolicy) -> Self {
        self.overrides.insert(class, policy);
        self
    }

    pub fn policy(&self, class: RouteClass) -> RateLimitPolicy {
        self.overrides
            .get(&class)
            .copied()
            .unwrap_or_else(|| class.policy())
    }

    fn counter_key(&self, class: RouteClass, identity: &str) -> String {
        format!("{}:{}:{}", self.key_prefix, class.as_str(), identity)
    }

    /// Count this request and decide whether it may proceed.
    ///
    /// Fails open: if the counter store errors or times out the request is
    /// allowed and a warning is emitted.
    pub async fn admit(&self, class: RouteClass, identity: &str) -> Admission {
        let policy = self.policy(class);
        let key = self.counter_key(class, identity);

        match self.store.incr_window(&key, policy.window).await {
            Ok(window) => {
                let allowed = window.count <= policy.limit;
                let remaining = policy.limit.saturating_sub(window.count);
                if !allowed {
                    debug!(
                        route_class = %class,
                        identity = identity,
                        count = window.count,
                        limit = policy.limit,
                        "Rate limit exceeded"
                    );
                }
                Admission {
                    allowed,
                    limit: policy.limit,
                    remaining,
                    reset_at: reset_at(window.reset_in),
                    reset_in: window.reset_in,
                    degraded: false,
                }
            }
            Err(e) => {
                warn!(
                    route_class = %class,
                    backend = self.store.backend(),
                    error = %e,
                    "Rate limiter store unavailable, failing open"
                );
                Admission {
                    allowed: true,
                    limit: policy.limit,
                    remaining: policy.limit,
                    reset_at: reset_at(policy.window),
                    reset_in: policy.window,
                    degraded: true,
                }
            }
        }
    }
}

fn reset_at(reset_in: Duration) -> DateTime<Utc> {
    let delta = chrono::Duration::from_std(reset_in).unwrap_or_else(|_| chrono::Duration::zero());
    Utc::now() + delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::testing::DownStore;
    use crate::counter::MemoryCounterStore;

    fn limiter(limit: u64, window: Duration) -> RateLimiter {
        RateLimiter::new(Arc::new(MemoryCounterStore::new()))
            .with_policy(RouteClass::General, RateLimitPolicy::new(limit, window))
    }

    #[tokio::test]
    async fn test_allows_up_to_limit_then_rejects() {
        let limiter = limiter(3, Duration::from_secs(60));

        for expected_remaining in [2, 1, 0] {
            let a = limiter.admit(RouteClass::General, "10.0.0.1").await;
            assert!(a.allowed);
            assert_eq!(a.remaining, expected_remaining);
        }

        let rejected = limiter.admit(RouteClass::General, "10.0.0.1").await;
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);
        assert!(rejected.retry_after_secs() > 0);
    }

    #[tokio::test]
    async fn test_new_window_after_expiry() {
        let limiter = limiter(1, Duration::from_millis(40));

        assert!(limiter.admit(RouteClass::General, "ip").await.allowed);
        assert!(!limiter.admit(RouteClass::General, "ip").await.allowed);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(limiter.admit(RouteClass::General, "ip").await.allowed);
    }

    #[tokio::test]
    async fn test_identities_and_classes_are_independent() {
        let limiter = limiter(1, Duration::from_secs(60));

        assert!(limiter.admit(RouteClass::General, "a").await.allowed);
        assert!(limiter.admit(RouteClass::General, "b").await.allowed);
        // Same identity under another class has its own counter
        assert!(limiter.admit(RouteClass::AuthSendOtp, "a").await.allowed);
    }

    #[tokio::test]
    async fn test_contractual_quota_for_otp() {
        let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()));
        for _ in 0..5 {
            assert!(limiter.admit(RouteClass::AuthSendOtp, "+15550100").await.allowed);
        }
        assert!(!limiter.admit(RouteClass::AuthSendOtp, "+15550100").await.allowed);
    }

    #[tokio::test]
    async fn test_fails_open_when_store_down() {
        let limiter = RateLimiter::new(Arc::new(DownStore));
        for _ in 0..200 {
            let a = limiter.admit(RouteClass::General, "ip").await;
            assert!(a.allowed);
            assert!(a.degraded);
        }
    }
}
