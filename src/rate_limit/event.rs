use axum::http::Method;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::auth::{Identity, ANONYMOUS_ROLE};
use crate::request::RequestContext;
use crate::types::is_read_method;

/// Limit value meaning "never throttled"
pub const UNLIMITED: i64 = -1;

/// Which requests an event counts
#[derive(Clone, Default)]
pub enum EventScope {
    #[default]
    All,
    WriteMethods,
    Methods(HashSet<Method>),
    Custom(Arc<dyn Fn(&RequestContext) -> bool + Send + Sync>),
}

impl fmt::Debug for EventScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventScope::All => write!(f, "All"),
            EventScope::WriteMethods => write!(f, "WriteMethods"),
            EventScope::Methods(methods) => f.debug_tuple("Methods").field(methods).finish(),
            EventScope::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// One named throttling rule on a resource
#[derive(Debug, Clone)]
pub struct RateLimitEvent {
    pub id: String,
    pub period_secs: i64,
    pub limits_by_role: HashMap<String, i64>,
    pub scope: EventScope,
}

impl RateLimitEvent {
    pub fn new(id: impl Into<String>, period_secs: i64) -> Self {
        Self {
            id: id.into(),
            period_secs,
            limits_by_role: HashMap::new(),
            scope: EventScope::All,
        }
    }

    pub fn limit(mut self, role: impl Into<String>, limit: i64) -> Self {
        self.limits_by_role.insert(role.into(), limit);
        self
    }

    pub fn scoped(mut self, scope: EventScope) -> Self {
        self.scope = scope;
        self
    }

    /// Effective limit for `identity`, `None` when unlimited.
    ///
    /// Among the identity's roles with a configured limit, unlimited wins,
    /// otherwise the largest limit. Without a matching role the anonymous
    /// entry applies; with no entry at all the event does not throttle.
    pub fn limit_for(&self, identity: &Identity) -> Option<i64> {
        let matching: Vec<i64> = identity
            .roles
            .iter()
            .filter_map(|role| self.limits_by_role.get(role).copied())
            .collect();

        let limit = if matching.is_empty() {
            *self.limits_by_role.get(ANONYMOUS_ROLE)?
        } else if matching.iter().any(|l| *l < 0) {
            UNLIMITED
        } else {
            matching.into_iter().max().unwrap_or(UNLIMITED)
        };

        (limit >= 0).then_some(limit)
    }

    pub fn is_requested_event(&self, request: &RequestContext) -> bool {
        match &self.scope {
            EventScope::All => true,
            EventScope::WriteMethods => !is_read_method(&request.method),
            EventScope::Methods(methods) => methods.contains(&request.method),
            EventScope::Custom(predicate) => predicate(request),
        }
    }
}
