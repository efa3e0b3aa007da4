pub mod basic;
pub mod cookie;
pub mod identity;
pub mod manager;
pub mod provider;
pub mod store;
pub mod token;

use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;

pub use basic::BasicAuthProvider;
pub use cookie::CookieAuthProvider;
pub use identity::{Identity, ANONYMOUS_ROLE};
pub use manager::{AuthState, AuthenticationManager};
pub use provider::{AuthenticationPolicy, AuthenticationProvider, AuthenticationProviders};
pub use store::{AccountStore, MemoryAccountStore, MemorySessionStore, Session, SessionStore};
pub use token::TokenAuthProvider;

/// Access token payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub name: String,
    pub roles: Vec<String>,
    pub iss: String,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn new(identity: &Identity, config: &AuthConfig) -> Self {
        let now = Utc::now();
        let exp = (now + Duration::hours(config.token_expiry_hours as i64)).timestamp();

        Self {
            sub: identity.id.clone(),
            name: identity.name.clone(),
            roles: identity.roles.iter().cloned().collect(),
            iss: config.jwt_issuer.clone(),
            exp,
            iat: now.timestamp(),
        }
    }

    pub fn into_identity(self) -> Identity {
        Identity::new(self.sub, self.name, self.roles)
    }
}

#[derive(Debug)]
pub enum JwtError {
    TokenGeneration(String),
    InvalidSecret,
}

impl std::fmt::Display for JwtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JwtError::TokenGeneration(msg) => write!(f, "JWT generation error: {}", msg),
            JwtError::InvalidSecret => write!(f, "Invalid JWT secret"),
        }
    }
}

impl std::error::Error for JwtError {}

/// Sign an HS256 access token for `identity`
pub fn issue_token(identity: &Identity, config: &AuthConfig) -> Result<String, JwtError> {
    encode_claims(&Claims::new(identity, config), config)
}

pub fn encode_claims(claims: &Claims, config: &AuthConfig) -> Result<String, JwtError> {
    if config.jwt_secret.is_empty() {
        return Err(JwtError::InvalidSecret);
    }

    let encoding_key = EncodingKey::from_secret(config.jwt_secret.as_bytes());
    encode(&Header::default(), claims, &encoding_key)
        .map_err(|e| JwtError::TokenGeneration(e.to_string()))
}
