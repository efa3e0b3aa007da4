use async_trait::async_trait;
use std::sync::Arc;

use super::identity::Identity;
use super::provider::AuthenticationProvider;
use super::store::{secrets_match, SessionStore};
use crate::config::AuthConfig;
use crate::error::ApiError;
use crate::request::RequestContext;
use crate::types::is_read_method;

/// Browser session cookie; write methods must echo the session's CSRF token
pub struct CookieAuthProvider {
    sessions: Arc<dyn SessionStore>,
    cookie_name: String,
    csrf_header: String,
}

impl CookieAuthProvider {
    pub const NAME: &'static str = "cookie";

    pub fn new(sessions: Arc<dyn SessionStore>, config: &AuthConfig) -> Self {
        Self {
            sessions,
            cookie_name: config.session_cookie.clone(),
            csrf_header: config.csrf_header.clone(),
        }
    }
}

#[async_trait]
impl AuthenticationProvider for CookieAuthProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn applies(&self, request: &RequestContext) -> bool {
        request.cookie(&self.cookie_name).is_some()
    }

    async fn authenticate(&self, request: &RequestContext) -> Result<Option<Identity>, ApiError> {
        let Some(session_id) = request.cookie(&self.cookie_name) else {
            return Ok(None);
        };
        let Some(session) = self.sessions.load(&session_id).await? else {
            tracing::debug!("Unknown session cookie");
            return Ok(None);
        };

        if !is_read_method(&request.method) {
            let token = request
                .header(&self.csrf_header)
                .ok_or_else(|| ApiError::bad_request("No CSRF token passed in the HTTP header."))?;
            if !secrets_match(token, &session.csrf_token) {
                tracing::warn!("CSRF token mismatch for account {}", session.identity.id);
                return Err(ApiError::forbidden("CSRF token validation failed."));
            }
        }

        Ok(Some(session.identity))
    }
}
