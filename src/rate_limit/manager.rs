use std::sync::Arc;

use super::counter::{Clock, RateLimitCounter};
use super::event::RateLimitEvent;
use super::store::RateLimitStore;
use crate::auth::Identity;
use crate::config::RateLimitConfig;
use crate::error::ApiError;
use crate::request::RequestContext;

pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
pub const HEADER_RESET: &str = "X-RateLimit-Reset";

const GLOBAL_KEY: &str = "global";

/// Quota left on one event after an admitted request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub event: String,
    pub limit: i64,
    pub remaining: i64,
    pub reset_secs: i64,
}

impl RateLimitStatus {
    /// The status with the least remaining quota, ties broken by the later reset
    pub fn most_restrictive(statuses: &[RateLimitStatus]) -> Option<&RateLimitStatus> {
        statuses
            .iter()
            .min_by(|a, b| a.remaining.cmp(&b.remaining).then(b.reset_secs.cmp(&a.reset_secs)))
    }

    pub fn headers(&self) -> [(&'static str, String); 3] {
        [
            (HEADER_LIMIT, self.limit.to_string()),
            (HEADER_REMAINING, self.remaining.to_string()),
            (HEADER_RESET, self.reset_secs.to_string()),
        ]
    }
}

/// Windowed admission control over persisted counters.
///
/// The counter is read, checked and written back as separate steps; concurrent
/// requests from one subject may overshoot the limit slightly.
pub struct RateLimitManager {
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    global: Option<RateLimitEvent>,
}

impl RateLimitManager {
    pub fn new(store: Arc<dyn RateLimitStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            global: None,
        }
    }

    /// Build from config; adds the global event when it is enabled
    pub fn from_config(
        store: Arc<dyn RateLimitStore>,
        clock: Arc<dyn Clock>,
        config: &RateLimitConfig,
    ) -> Self {
        let manager = Self::new(store, clock);
        if !config.enable_global {
            return manager;
        }
        manager.with_global(
            RateLimitEvent::new(GLOBAL_KEY, config.global_period_secs)
                .limit(crate::auth::ANONYMOUS_ROLE, config.global_limit),
        )
    }

    pub fn with_global(mut self, event: RateLimitEvent) -> Self {
        self.global = Some(event);
        self
    }

    pub fn store(&self) -> &Arc<dyn RateLimitStore> {
        &self.store
    }

    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    /// Evaluate every event for `resource`; the first rejection aborts.
    ///
    /// Returns one status per event that actually counted this request.
    pub async fn check_rate_limit(
        &self,
        resource: &str,
        events: &[RateLimitEvent],
        request: &RequestContext,
        identity: &Identity,
    ) -> Result<Vec<RateLimitStatus>, ApiError> {
        let subject = subject_id(request, identity);
        let mut statuses = Vec::new();

        if let Some(global) = &self.global {
            if let Some(status) = self
                .check_event(GLOBAL_KEY, global, request, identity, &subject)
                .await?
            {
                statuses.push(status);
            }
        }

        for event in events {
            if let Some(status) = self
                .check_event(resource, event, request, identity, &subject)
                .await?
            {
                statuses.push(status);
            }
        }

        Ok(statuses)
    }

    async fn check_event(
        &self,
        resource: &str,
        event: &RateLimitEvent,
        request: &RequestContext,
        identity: &Identity,
        subject: &str,
    ) -> Result<Option<RateLimitStatus>, ApiError> {
        let Some(limit) = event.limit_for(identity) else {
            return Ok(None);
        };
        if !event.is_requested_event(request) {
            return Ok(None);
        }

        let identifier = RateLimitCounter::identifier(resource, &event.id, subject);
        let mut counter = self
            .store
            .load(&identifier)
            .await?
            .unwrap_or_else(|| RateLimitCounter::fresh(identifier.clone()));
        let now = self.clock.now();

        if counter.is_expired(now) {
            if limit == 0 {
                tracing::warn!("Rate limit '{}' forbids every request ({})", event.id, identifier);
                return Err(rejection(&event.id, event.period_secs));
            }
            counter.reset(now, event.period_secs);
        } else if counter.hits >= limit {
            tracing::warn!(
                "Rate limit '{}' exceeded for {} ({} hits)",
                event.id,
                identifier,
                counter.hits
            );
            return Err(rejection(&event.id, counter.seconds_until_reset(now)));
        }

        // Count the hit only once the request is admitted
        counter.hits += 1;
        self.store.save(&counter).await?;

        tracing::debug!(
            "Rate limit '{}' admitted {} ({}/{})",
            event.id,
            identifier,
            counter.hits,
            limit
        );

        Ok(Some(RateLimitStatus {
            event: event.id.clone(),
            limit,
            remaining: (limit - counter.hits).max(0),
            reset_secs: counter.seconds_until_reset(now),
        }))
    }

    /// Sweep closed windows from the store
    pub async fn purge_expired(&self) -> Result<u64, ApiError> {
        let removed = self.store.purge_expired(self.clock.now()).await?;
        if removed > 0 {
            tracing::info!("Purged {} expired rate limit counters", removed);
        }
        Ok(removed)
    }
}

/// Account id, or caller IP for anonymous requests
fn subject_id(request: &RequestContext, identity: &Identity) -> String {
    if identity.is_anonymous() {
        request
            .client_ip
            .clone()
            .unwrap_or_else(|| "unknown".to_string())
    } else {
        identity.id.clone()
    }
}

fn rejection(event: &str, retry_after: i64) -> ApiError {
    ApiError::rate_limited(
        format!("Too many requests for '{}'. Try again later.", event),
        retry_after.max(1) as u64,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::counter::FixedClock;
    use crate::rate_limit::event::{EventScope, UNLIMITED};
    use crate::rate_limit::store::MemoryRateLimitStore;
    use axum::http::Method;

    const DAY: i64 = 86_400;

    fn manager(clock: Arc<FixedClock>) -> (RateLimitManager, Arc<MemoryRateLimitStore>) {
        let store = Arc::new(MemoryRateLimitStore::new());
        (RateLimitManager::new(store.clone(), clock), store)
    }

    fn anonymous_request() -> RequestContext {
        RequestContext::get("articles").with_client_ip("10.0.0.1")
    }

    #[tokio::test]
    async fn third_anonymous_request_is_rejected() {
        let clock = Arc::new(FixedClock::new(1_000));
        let (manager, _) = manager(clock.clone());
        let events = [RateLimitEvent::new("request", DAY).limit("anonymous", 2)];
        let anon = Identity::anonymous();

        let first = manager
            .check_rate_limit("articles", &events, &anonymous_request(), &anon)
            .await
            .unwrap();
        assert_eq!(first[0].remaining, 1);

        let second = manager
            .check_rate_limit("articles", &events, &anonymous_request(), &anon)
            .await
            .unwrap();
        assert_eq!(second[0].remaining, 0);

        clock.advance(10);
        let err = manager
            .check_rate_limit("articles", &events, &anonymous_request(), &anon)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 429);
        assert_eq!(err.retry_after(), Some((DAY - 10) as u64));
    }

    #[tokio::test]
    async fn window_resets_after_expiration() {
        let clock = Arc::new(FixedClock::new(1_000));
        let (manager, store) = manager(clock.clone());
        let events = [RateLimitEvent::new("request", 60).limit("anonymous", 1)];
        let anon = Identity::anonymous();

        manager
            .check_rate_limit("articles", &events, &anonymous_request(), &anon)
            .await
            .unwrap();
        assert!(manager
            .check_rate_limit("articles", &events, &anonymous_request(), &anon)
            .await
            .is_err());

        clock.advance(61);
        let statuses = manager
            .check_rate_limit("articles", &events, &anonymous_request(), &anon)
            .await
            .unwrap();
        assert_eq!(statuses[0].remaining, 0);

        let counter = store
            .load("articles::request::10.0.0.1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(counter.hits, 1);
        assert_eq!(counter.timestamp, 1_061);
        assert_eq!(counter.expiration, 1_121);
    }

    #[tokio::test]
    async fn zero_limit_rejects_first_request() {
        let clock = Arc::new(FixedClock::new(1_000));
        let (manager, store) = manager(clock);
        let events = [RateLimitEvent::new("create", 300).limit("anonymous", 0)];

        let err = manager
            .check_rate_limit("articles", &events, &anonymous_request(), &Identity::anonymous())
            .await
            .unwrap_err();
        assert_eq!(err.retry_after(), Some(300));
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn unlimited_and_out_of_scope_events_touch_nothing() {
        let clock = Arc::new(FixedClock::new(1_000));
        let (manager, store) = manager(clock);
        let events = [
            RateLimitEvent::new("request", DAY).limit("admin", UNLIMITED),
            RateLimitEvent::new("write", DAY)
                .limit("admin", 5)
                .scoped(EventScope::WriteMethods),
        ];
        let admin = Identity::new("1", "root", ["admin"]);

        let statuses = manager
            .check_rate_limit("articles", &events, &RequestContext::get("articles"), &admin)
            .await
            .unwrap();
        assert!(statuses.is_empty());
        assert_eq!(store.len().await, 0);

        let statuses = manager
            .check_rate_limit(
                "articles",
                &events,
                &RequestContext::new(Method::POST, "articles"),
                &admin,
            )
            .await
            .unwrap();
        assert_eq!(statuses.len(), 1);
        assert!(store.load("articles::write::1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn global_event_is_keyed_separately() {
        let clock = Arc::new(FixedClock::new(1_000));
        let store = Arc::new(MemoryRateLimitStore::new());
        let config = RateLimitConfig {
            enable_global: true,
            global_limit: 5,
            global_period_secs: 60,
            store: crate::config::CounterStore::Memory,
        };
        let manager = RateLimitManager::from_config(store.clone(), clock, &config);

        let statuses = manager
            .check_rate_limit("articles", &[], &anonymous_request(), &Identity::anonymous())
            .await
            .unwrap();
        assert_eq!(statuses[0].event, "global");
        assert!(store.load("global::global::10.0.0.1").await.unwrap().is_some());
    }

    #[test]
    fn most_restrictive_has_least_remaining() {
        let statuses = vec![
            RateLimitStatus { event: "a".into(), limit: 10, remaining: 4, reset_secs: 5 },
            RateLimitStatus { event: "b".into(), limit: 3, remaining: 1, reset_secs: 50 },
        ];
        let status = RateLimitStatus::most_restrictive(&statuses).unwrap();
        assert_eq!(status.event, "b");
        assert_eq!(status.headers()[1], (HEADER_REMAINING, "1".to_string()));
    }
}
