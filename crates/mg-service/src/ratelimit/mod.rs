//! Per-(identifier, endpoint-class) sliding-window rate limiter.
//!
//! For each key the limiter keeps the instants of the accepted events inside
//! the current window, at most the per-class cap of them. Rejections do not
//! consume capacity. The identifier is a session id when one exists, else a
//! hashed peer address; raw addresses never become keys.

use crate::observability::metrics::record_rate_limit_decision;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::instrument;

/// Endpoint classes with independent caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    /// Session issuance.
    Session,
    /// General API surface (health, tools, compliance).
    General,
    /// Medical synthesis endpoints.
    Medical,
}

impl EndpointClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointClass::Session => "session",
            EndpointClass::General => "general",
            EndpointClass::Medical => "medical",
        }
    }
}

/// Limiter configuration, derived from the service config.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub session_cap: u32,
    pub general_cap: u32,
    pub medical_cap: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            session_cap: 10,
            general_cap: 100,
            medical_cap: 20,
        }
    }
}

impl RateLimitConfig {
    fn cap(&self, class: EndpointClass) -> u32 {
        match class {
            EndpointClass::Session => self.session_cap,
            EndpointClass::General => self.general_cap,
            EndpointClass::Medical => self.medical_cap,
        }
    }
}

/// Outcome of a limiter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests left in the window after this decision.
    pub remaining: u32,
    /// When the oldest event in the window falls out.
    pub reset_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RateKey {
    identifier: String,
    class: EndpointClass,
}

/// Sliding-window counter, safe under concurrent invocation.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<RateKey, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Check and, when allowed, consume one slot for `(identifier, class)`.
    #[instrument(skip_all, name = "mg.ratelimit.check")]
    pub fn check(&self, identifier: &str, class: EndpointClass) -> RateDecision {
        let cap = self.config.cap(class);
        let now = Instant::now();
        let window = self.config.window;

        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            // A poisoned limiter fails open: availability over throttling
            Err(poisoned) => poisoned.into_inner(),
        };

        let events = windows.entry(RateKey {
            identifier: identifier.to_string(),
            class,
        });
        let events = events.or_default();

        // Slide the window
        while let Some(front) = events.front() {
            if now.duration_since(*front) >= window {
                events.pop_front();
            } else {
                break;
            }
        }

        let reset_at = events
            .front()
            .map(|front| {
                let elapsed = now.duration_since(*front);
                Utc::now() + ChronoDuration::from_std(window - elapsed).unwrap_or_default()
            })
            .unwrap_or_else(|| {
                Utc::now() + ChronoDuration::from_std(window).unwrap_or_default()
            });

        if (events.len() as u32) < cap {
            events.push_back(now);
            let remaining = cap - events.len() as u32;
            record_rate_limit_decision(class.as_str(), "allowed");
            RateDecision {
                allowed: true,
                remaining,
                reset_at,
            }
        } else {
            record_rate_limit_decision(class.as_str(), "rejected");
            RateDecision {
                allowed: false,
                remaining: 0,
                reset_at,
            }
        }
    }

    /// Drop keys whose windows have fully drained. Called by the background
    /// sweeper so idle identifiers do not accumulate forever.
    pub fn prune(&self) {
        let window = self.config.window;
        let now = Instant::now();
        if let Ok(mut windows) = self.windows.lock() {
            windows.retain(|_, events| {
                events
                    .back()
                    .is_some_and(|last| now.duration_since(*last) < window)
            });
        }
    }

    /// Number of tracked keys (for the detailed health endpoint).
    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().map(|w| w.len()).unwrap_or(0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn limiter(cap: u32, window: Duration) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            window,
            session_cap: cap,
            general_cap: cap,
            medical_cap: cap,
        })
    }

    #[test]
    fn test_exactly_cap_allowed_then_rejected() {
        let limiter = limiter(3, Duration::from_secs(60));

        for i in 0..3 {
            let decision = limiter.check("client-a", EndpointClass::Medical);
            assert!(decision.allowed, "request {i} should be allowed");
        }

        let decision = limiter.check("client-a", EndpointClass::Medical);
        assert!(!decision.allowed, "cap + 1 must be rejected");
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn test_remaining_counts_down() {
        let limiter = limiter(3, Duration::from_secs(60));
        assert_eq!(
            limiter.check("c", EndpointClass::General).remaining,
            2
        );
        assert_eq!(
            limiter.check("c", EndpointClass::General).remaining,
            1
        );
        assert_eq!(
            limiter.check("c", EndpointClass::General).remaining,
            0
        );
    }

    #[test]
    fn test_classes_are_independent() {
        let limiter = limiter(1, Duration::from_secs(60));
        assert!(limiter.check("c", EndpointClass::Medical).allowed);
        assert!(!limiter.check("c", EndpointClass::Medical).allowed);
        // Same identifier, different class: unaffected
        assert!(limiter.check("c", EndpointClass::General).allowed);
    }

    #[test]
    fn test_identifiers_are_independent() {
        let limiter = limiter(1, Duration::from_secs(60));
        assert!(limiter.check("a", EndpointClass::Medical).allowed);
        assert!(limiter.check("b", EndpointClass::Medical).allowed);
    }

    #[test]
    fn test_window_slides() {
        let limiter = limiter(1, Duration::from_millis(20));
        assert!(limiter.check("c", EndpointClass::Medical).allowed);
        assert!(!limiter.check("c", EndpointClass::Medical).allowed);

        std::thread::sleep(Duration::from_millis(30));
        assert!(
            limiter.check("c", EndpointClass::Medical).allowed,
            "slot must free after the window slides"
        );
    }

    #[test]
    fn test_rejection_does_not_consume() {
        let limiter = limiter(2, Duration::from_millis(50));
        assert!(limiter.check("c", EndpointClass::Medical).allowed);
        assert!(limiter.check("c", EndpointClass::Medical).allowed);
        // Hammering while rejected must not extend the lockout
        for _ in 0..10 {
            assert!(!limiter.check("c", EndpointClass::Medical).allowed);
        }
        std::thread::sleep(Duration::from_millis(60));
        assert!(limiter.check("c", EndpointClass::Medical).allowed);
    }

    #[test]
    fn test_reset_at_is_in_the_future() {
        let limiter = limiter(1, Duration::from_secs(60));
        let decision = limiter.check("c", EndpointClass::Medical);
        assert!(decision.reset_at > Utc::now());
    }

    #[test]
    fn test_prune_drops_drained_keys() {
        let limiter = limiter(2, Duration::from_millis(10));
        limiter.check("a", EndpointClass::General);
        limiter.check("b", EndpointClass::Medical);
        assert_eq!(limiter.tracked_keys(), 2);

        std::thread::sleep(Duration::from_millis(20));
        limiter.prune();
        assert_eq!(limiter.tracked_keys(), 0);
    }
}
