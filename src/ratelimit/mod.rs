//! Shared fixed-window rate limiting
//!
//! Each route class has a contractual quota. Counters live in the shared
//! [`CounterStore`](crate::counter::CounterStore) so every instance enforces
//! the same window.

pub mod limiter;

pub use limiter::{Admission, RateLimiter};

use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Named group of endpoints sharing one quota
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouteClass {
    /// OTP requests, keyed by phone number
    AuthSendOtp,
    /// Complaint creation and refiles, keyed by citizen
    ComplaintSubmit,
    /// Escalations, keyed by complaint and citizen
    Escalate,
    /// Everything else, keyed by client IP
    General,
}

impl RouteClass {
    pub const ALL: [RouteClass; 4] = [
        RouteClass::AuthSendOtp,
        RouteClass::ComplaintSubmit,
        RouteClass::Escalate,
        RouteClass::General,
    ];

    /// Key segment used in counter keys and 429 bodies
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthSendOtp => "auth-send-otp",
            Self::ComplaintSubmit => "complaint-submit",
            Self::Escalate => "escalate",
            Self::General => "general",
        }
    }

    /// Quota for this class. These values are part of the public contract.
    pub fn policy(&self) -> RateLimitPolicy {
        match self {
            Self::AuthSendOtp => RateLimitPolicy::new(5, Duration::from_secs(10 * 60)),
            Self::ComplaintSubmit => RateLimitPolicy::new(20, Duration::from_secs(60 * 60)),
            Self::Escalate => RateLimitPolicy::new(10, Duration::from_secs(7 * 24 * 60 * 60)),
            Self::General => RateLimitPolicy::new(100, Duration::from_secs(15 * 60)),
        }
    }
}

impl fmt::Display for RouteClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requests allowed per window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub limit: u64,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub const fn new(limit: u64, window: Duration) -> Self {
        Self { limit, window }
    }
}

/// Identity for the escalate class
pub fn escalate_identity(complaint_id: &str, citizen_id: &str) -> String {
    format!("{}:{}", complaint_id, citizen_id)
}

/// Paths never counted against the general quota
pub fn is_exempt_path(path: &str) -> bool {
    matches!(path, "/health" | "/metrics" | "/favicon.ico")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contractual_policies() {
        assert_eq!(
            RouteClass::AuthSendOtp.policy(),
            RateLimitPolicy::new(5, Duration::from_secs(600))
        );
        assert_eq!(
            RouteClass::ComplaintSubmit.policy(),
            RateLimitPolicy::new(20, Duration::from_secs(3600))
        );
        assert_eq!(
            RouteClass::Escalate.policy(),
            RateLimitPolicy::new(10, Duration::from_secs(604_800))
        );
        assert_eq!(
            RouteClass::General.policy(),
            RateLimitPolicy::new(100, Duration::from_secs(900))
        );
    }

    #[test]
    fn test_class_names() {
        let names: Vec<&str> = RouteClass::ALL.iter().map(|c| c.as_str()).collect();
        assert_eq!(
            names,
            vec!["auth-send-otp", "complaint-submit", "escalate", "general"]
        );
        assert_eq!(
            serde_json::to_value(RouteClass::ComplaintSubmit).unwrap(),
            "complaint-submit"
        );
    }

    #[test]
    fn test_exempt_paths() {
        assert!(is_exempt_path("/health"));
        assert!(is_exempt_path("/favicon.ico"));
        assert!(!is_exempt_path("/complaints"));
    }
}
