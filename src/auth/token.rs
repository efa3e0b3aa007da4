use async_trait::async_trait;
use axum::http::header;
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};

use super::identity::Identity;
use super::provider::AuthenticationProvider;
use super::Claims;
use crate::config::AuthConfig;
use crate::error::ApiError;
use crate::request::RequestContext;

/// Signed access token from a dedicated header, a Bearer authorization or a query parameter
pub struct TokenAuthProvider {
    config: AuthConfig,
}

impl TokenAuthProvider {
    pub const NAME: &'static str = "token";

    pub fn new(config: &AuthConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Extract the raw token, in header, bearer, query order
    fn extract_token<'a>(&self, request: &'a RequestContext) -> Option<&'a str> {
        if let Some(token) = request.header(&self.config.token_header) {
            return Some(token.trim());
        }
        if let Some(token) = request
            .header(header::AUTHORIZATION.as_str())
            .and_then(|v| v.strip_prefix("Bearer "))
        {
            return Some(token.trim());
        }
        request.query_param(&self.config.token_query_param)
    }

    fn validate(&self, token: &str) -> Result<Option<Claims>, ApiError> {
        if self.config.jwt_secret.is_empty() {
            return Err(ApiError::server_configuration("JWT secret not configured"));
        }

        let decoding_key = DecodingKey::from_secret(self.config.jwt_secret.as_bytes());
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.config.jwt_issuer.as_str()]);

        match decode::<Claims>(token, &decoding_key, &validation) {
            Ok(data) => Ok(Some(data.claims)),
            Err(e) if matches!(e.kind(), ErrorKind::ExpiredSignature) => {
                tracing::debug!("Access token expired");
                Ok(None)
            }
            Err(e) => {
                tracing::warn!("Invalid access token: {}", e);
                Err(ApiError::unauthorized("Invalid access token"))
            }
        }
    }
}

#[async_trait]
impl AuthenticationProvider for TokenAuthProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn applies(&self, request: &RequestContext) -> bool {
        self.extract_token(request).is_some_and(|t| !t.is_empty())
    }

    async fn authenticate(&self, request: &RequestContext) -> Result<Option<Identity>, ApiError> {
        match self.extract_token(request) {
            Some(token) if !token.is_empty() => {
                Ok(self.validate(token)?.map(Claims::into_identity))
            }
            _ => Ok(None),
        }
    }
}
