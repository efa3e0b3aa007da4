use std::sync::Arc;

use super::identity::Identity;
use super::provider::{AuthenticationPolicy, AuthenticationProviders};
use crate::error::ApiError;
use crate::request::RequestContext;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Unresolved,
    Resolving,
    Resolved(Arc<Identity>),
}

/// Request-scoped chain-of-responsibility over the registered providers.
///
/// Resolves the acting identity at most once; later calls return the cached
/// result. Create a fresh manager for every request.
pub struct AuthenticationManager {
    providers: Arc<AuthenticationProviders>,
    state: AuthState,
}

impl AuthenticationManager {
    pub fn new(providers: Arc<AuthenticationProviders>) -> Self {
        Self {
            providers,
            state: AuthState::Unresolved,
        }
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    pub fn identity(&self) -> Option<Arc<Identity>> {
        match &self.state {
            AuthState::Resolved(identity) => Some(identity.clone()),
            _ => None,
        }
    }

    /// Resolve (or return the cached) identity for this request
    pub async fn resolve(
        &mut self,
        request: &RequestContext,
        policy: &AuthenticationPolicy,
    ) -> Result<Arc<Identity>, ApiError> {
        if let AuthState::Resolved(identity) = &self.state {
            return Ok(identity.clone());
        }

        self.state = AuthState::Resolving;
        let outcome = self.run_chain(request, policy).await;

        match outcome {
            Ok(Some(identity)) => {
                let identity = Arc::new(identity);
                self.state = AuthState::Resolved(identity.clone());
                Ok(identity)
            }
            Ok(None) if policy.required => {
                self.state = AuthState::Unresolved;
                tracing::warn!("Authentication required but no provider accepted the request");
                Err(ApiError::unauthorized("Authentication required"))
            }
            Ok(None) => {
                let anonymous = Arc::new(Identity::anonymous());
                self.state = AuthState::Resolved(anonymous.clone());
                Ok(anonymous)
            }
            Err(e) => {
                self.state = AuthState::Unresolved;
                Err(e)
            }
        }
    }

    async fn run_chain(
        &self,
        request: &RequestContext,
        policy: &AuthenticationPolicy,
    ) -> Result<Option<Identity>, ApiError> {
        for provider in self.providers.iter() {
            if !policy.allows(provider.name()) {
                continue;
            }
            if !provider.applies(request) {
                tracing::trace!("Auth provider '{}' does not apply", provider.name());
                continue;
            }

            // Hard failures propagate; they are not retried against later providers
            match provider.authenticate(request).await? {
                Some(identity) => {
                    tracing::debug!(
                        "Auth provider '{}' resolved account '{}' ({})",
                        provider.name(),
                        identity.name,
                        identity.id
                    );
                    return Ok(Some(identity));
                }
                None => {
                    tracing::debug!("Auth provider '{}' found no account", provider.name());
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::provider::AuthenticationProvider;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        name: &'static str,
        applies: bool,
        result: Result<Option<Identity>, ApiError>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(name: &'static str, applies: bool, result: Result<Option<Identity>, ApiError>) -> Arc<Self> {
            Arc::new(Self {
                name,
                applies,
                result,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AuthenticationProvider for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        fn applies(&self, _request: &RequestContext) -> bool {
            self.applies
        }

        async fn authenticate(&self, _request: &RequestContext) -> Result<Option<Identity>, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    fn chain(providers: Vec<Arc<Scripted>>) -> Arc<AuthenticationProviders> {
        let mut registry = AuthenticationProviders::new();
        for p in providers {
            registry.register(p);
        }
        Arc::new(registry)
    }

    #[tokio::test]
    async fn only_applicable_provider_is_asked() {
        let first = Scripted::new("first", false, Ok(Some(Identity::new("1", "one", ["a"]))));
        let second = Scripted::new("second", true, Ok(Some(Identity::new("2", "two", ["b"]))));
        let mut manager = AuthenticationManager::new(chain(vec![first.clone(), second.clone()]));

        let identity = manager
            .resolve(&RequestContext::get("x"), &AuthenticationPolicy::required())
            .await
            .unwrap();

        assert_eq!(identity.id, "2");
        assert_eq!(first.calls(), 0);
        assert_eq!(second.calls(), 1);
    }

    #[tokio::test]
    async fn hard_failure_aborts_the_chain() {
        let failing = Scripted::new("failing", true, Err(ApiError::forbidden("CSRF token validation failed.")));
        let fallback = Scripted::new("fallback", true, Ok(Some(Identity::new("2", "two", ["b"]))));
        let mut manager = AuthenticationManager::new(chain(vec![failing, fallback.clone()]));

        let err = manager
            .resolve(&RequestContext::get("x"), &AuthenticationPolicy::optional())
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), 403);
        assert_eq!(fallback.calls(), 0);
        assert_eq!(manager.state(), &AuthState::Unresolved);
    }

    #[tokio::test]
    async fn optional_falls_back_to_anonymous_and_caches() {
        let nobody = Scripted::new("nobody", true, Ok(None));
        let mut manager = AuthenticationManager::new(chain(vec![nobody.clone()]));
        let request = RequestContext::get("x");

        let first = manager.resolve(&request, &AuthenticationPolicy::optional()).await.unwrap();
        let second = manager.resolve(&request, &AuthenticationPolicy::optional()).await.unwrap();

        assert!(first.is_anonymous());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(nobody.calls(), 1);
    }

    #[tokio::test]
    async fn required_without_account_is_unauthorized() {
        let mut manager = AuthenticationManager::new(chain(vec![]));
        let err = manager
            .resolve(&RequestContext::get("x"), &AuthenticationPolicy::required())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 401);
    }

    #[tokio::test]
    async fn policy_restricts_provider_names() {
        let basic = Scripted::new("basic", true, Ok(Some(Identity::new("1", "one", ["a"]))));
        let token = Scripted::new("token", true, Ok(Some(Identity::new("2", "two", ["b"]))));
        let mut manager = AuthenticationManager::new(chain(vec![basic.clone(), token]));

        let identity = manager
            .resolve(&RequestContext::get("x"), &AuthenticationPolicy::required().only(["token"]))
            .await
            .unwrap();

        assert_eq!(identity.id, "2");
        assert_eq!(basic.calls(), 0);
    }
}
