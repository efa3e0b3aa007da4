use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

/// Persisted hit counter for one `resource::event::subject` identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RateLimitCounter {
    pub identifier: String,
    pub hits: i64,
    pub timestamp: i64,
    pub expiration: i64,
}

impl RateLimitCounter {
    /// A counter that has never been hit; it starts out expired
    pub fn fresh(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            hits: 0,
            timestamp: 0,
            expiration: 0,
        }
    }

    pub fn identifier(resource: &str, event: &str, subject: &str) -> String {
        format!("{}::{}::{}", resource, event, subject)
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expiration
    }

    /// Open a new window starting at `now`
    pub fn reset(&mut self, now: i64, period_secs: i64) {
        self.hits = 0;
        self.timestamp = now;
        self.expiration = now + period_secs;
    }

    pub fn seconds_until_reset(&self, now: i64) -> i64 {
        (self.expiration - now).max(0)
    }
}

/// Time source for window arithmetic, in Unix seconds
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Manually driven clock for tests and replay
#[derive(Debug, Default)]
pub struct FixedClock {
    now: AtomicI64,
}

impl FixedClock {
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_counter_is_expired() {
        let counter = RateLimitCounter::fresh("articles::request::1");
        assert!(counter.is_expired(1));
    }

    #[test]
    fn window_boundary_is_inclusive() {
        let mut counter = RateLimitCounter::fresh("x");
        counter.reset(100, 60);
        assert!(!counter.is_expired(160));
        assert!(counter.is_expired(161));
        assert_eq!(counter.seconds_until_reset(130), 30);
    }

    #[test]
    fn fixed_clock_advances() {
        let clock = FixedClock::new(1_000);
        clock.advance(5);
        assert_eq!(clock.now(), 1_005);
    }
}
