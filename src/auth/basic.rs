use async_trait::async_trait;
use axum::http::header;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::sync::Arc;

use super::identity::Identity;
use super::provider::AuthenticationProvider;
use super::store::AccountStore;
use crate::error::ApiError;
use crate::request::RequestContext;

/// HTTP Basic credentials checked against an account store
pub struct BasicAuthProvider {
    accounts: Arc<dyn AccountStore>,
}

impl BasicAuthProvider {
    pub const NAME: &'static str = "basic";

    pub fn new(accounts: Arc<dyn AccountStore>) -> Self {
        Self { accounts }
    }

    fn encoded_credentials(request: &RequestContext) -> Option<&str> {
        let value = request.header(header::AUTHORIZATION.as_str())?;
        let (scheme, rest) = value.split_once(' ')?;
        scheme.eq_ignore_ascii_case("basic").then(|| rest.trim())
    }
}

/// Decode `base64(user:password)`
pub fn decode_credentials(encoded: &str) -> Result<(String, String), ApiError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|_| ApiError::bad_request("Malformed Basic credentials"))?;
    let decoded =
        String::from_utf8(bytes).map_err(|_| ApiError::bad_request("Malformed Basic credentials"))?;
    let (user, password) = decoded
        .split_once(':')
        .ok_or_else(|| ApiError::bad_request("Malformed Basic credentials"))?;
    Ok((user.to_string(), password.to_string()))
}

#[async_trait]
impl AuthenticationProvider for BasicAuthProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn applies(&self, request: &RequestContext) -> bool {
        Self::encoded_credentials(request).is_some()
    }

    async fn authenticate(&self, request: &RequestContext) -> Result<Option<Identity>, ApiError> {
        let Some(encoded) = Self::encoded_credentials(request) else {
            return Ok(None);
        };
        let (user, password) = decode_credentials(encoded)?;
        let identity = self.accounts.verify_password(&user, &password).await?;
        if identity.is_none() {
            tracing::debug!("Basic credentials rejected for '{}'", user);
        }
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::store::MemoryAccountStore;

    async fn provider() -> BasicAuthProvider {
        let store = MemoryAccountStore::new();
        store
            .insert("ada", "s3cret", Identity::new("1", "ada", ["editor"]))
            .await;
        BasicAuthProvider::new(Arc::new(store))
    }

    fn with_basic(raw: &str) -> RequestContext {
        RequestContext::get("articles")
            .with_header("authorization", &format!("Basic {}", STANDARD.encode(raw)))
    }

    #[tokio::test]
    async fn accepts_valid_credentials() {
        let provider = provider().await;
        let request = with_basic("ada:s3cret");
        assert!(provider.applies(&request));
        let identity = provider.authenticate(&request).await.unwrap().unwrap();
        assert_eq!(identity.id, "1");
    }

    #[tokio::test]
    async fn wrong_password_yields_no_identity() {
        let provider = provider().await;
        assert!(provider
            .authenticate(&with_basic("ada:nope"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn garbage_is_a_bad_request() {
        let provider = provider().await;
        let request = RequestContext::get("articles").with_header("authorization", "Basic !!!");
        let err = provider.authenticate(&request).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn bearer_does_not_apply() {
        let store = Arc::new(MemoryAccountStore::new());
        let provider = BasicAuthProvider::new(store);
        let request = RequestContext::get("articles").with_header("authorization", "Bearer abc");
        assert!(!provider.applies(&request));
    }
}
