use async_trait::async_trait;
use std::sync::Arc;

use super::identity::Identity;
use crate::error::ApiError;
use crate::request::RequestContext;

/// One link in the authentication chain
#[async_trait]
pub trait AuthenticationProvider: Send + Sync {
    /// Provider name, used by resources to restrict which providers apply
    fn name(&self) -> &str;

    /// Whether the request carries the credential this provider consumes
    fn applies(&self, request: &RequestContext) -> bool;

    /// Resolve the credential into an account.
    ///
    /// `Ok(None)` lets the chain continue with the next provider. An `Err`
    /// aborts the whole chain.
    async fn authenticate(&self, request: &RequestContext) -> Result<Option<Identity>, ApiError>;
}

/// Registered providers, consulted in registration order
#[derive(Clone, Default)]
pub struct AuthenticationProviders {
    providers: Vec<Arc<dyn AuthenticationProvider>>,
}

impl AuthenticationProviders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn AuthenticationProvider>) -> &mut Self {
        tracing::info!("Registered authentication provider '{}'", provider.name());
        self.providers.push(provider);
        self
    }

    pub fn with(mut self, provider: Arc<dyn AuthenticationProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn AuthenticationProvider>> {
        self.providers.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Per-resource authentication settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthenticationPolicy {
    /// Reject with Unauthorized when no provider yields an account
    pub required: bool,
    /// Restrict the chain to these provider names (None = all)
    pub providers: Option<Vec<String>>,
}

impl AuthenticationPolicy {
    pub fn optional() -> Self {
        Self::default()
    }

    pub fn required() -> Self {
        Self {
            required: true,
            providers: None,
        }
    }

    pub fn only<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.providers = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn allows(&self, provider: &str) -> bool {
        match &self.providers {
            Some(names) => names.iter().any(|n| n == provider),
            None => true,
        }
    }
}
