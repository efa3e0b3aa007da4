use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::identity::Identity;
use crate::error::ApiError;

/// Account lookup used by credential-based providers
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Returns the account when the password matches, `None` otherwise
    async fn verify_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<Identity>, ApiError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Identity>, ApiError>;
}

/// A logged-in browser session
#[derive(Debug, Clone)]
pub struct Session {
    pub identity: Identity,
    pub csrf_token: String,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Option<Session>, ApiError>;
}

/// Salted SHA-256 password digest, hex encoded
pub fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Compares two secrets without short-circuiting on the first differing byte
pub fn secrets_match(left: &str, right: &str) -> bool {
    let left = Sha256::digest(left.as_bytes());
    let right = Sha256::digest(right.as_bytes());
    left.iter()
        .zip(right.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[derive(Debug, Clone)]
struct StoredAccount {
    identity: Identity,
    salt: String,
    password_hash: String,
}

#[derive(Default)]
pub struct MemoryAccountStore {
    by_name: RwLock<HashMap<String, StoredAccount>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, username: &str, password: &str, identity: Identity) {
        let salt = uuid::Uuid::new_v4().simple().to_string();
        let password_hash = hash_password(&salt, password);
        self.by_name.write().await.insert(
            username.to_string(),
            StoredAccount {
                identity,
                salt,
                password_hash,
            },
        );
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn verify_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<Identity>, ApiError> {
        let accounts = self.by_name.read().await;
        Ok(accounts
            .get(username)
            .filter(|account| {
                secrets_match(&hash_password(&account.salt, password), &account.password_hash)
            })
            .map(|account| account.identity.clone()))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Identity>, ApiError> {
        let accounts = self.by_name.read().await;
        Ok(accounts
            .values()
            .find(|account| account.identity.id == id)
            .map(|account| account.identity.clone()))
    }
}

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session_id: &str, session: Session) {
        self.sessions
            .write()
            .await
            .insert(session_id.to_string(), session);
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<Session>, ApiError> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn verifies_salted_passwords() {
        let store = MemoryAccountStore::new();
        store
            .insert("ada", "s3cret", Identity::new("1", "ada", ["editor"]))
            .await;

        let found = store.verify_password("ada", "s3cret").await.unwrap();
        assert_eq!(found.map(|i| i.id), Some("1".to_string()));
        assert!(store.verify_password("ada", "wrong").await.unwrap().is_none());
        assert!(store.verify_password("bob", "s3cret").await.unwrap().is_none());
        assert!(store.find_by_id("1").await.unwrap().is_some());
    }

    #[test]
    fn hash_depends_on_salt() {
        assert_ne!(hash_password("a", "pw"), hash_password("b", "pw"));
    }

    #[test]
    fn secrets_match_only_on_equal_input() {
        assert!(secrets_match("tok", "tok"));
        assert!(!secrets_match("tok", "tol"));
        assert!(!secrets_match("tok", "toke"));
        assert!(!secrets_match("", "tok"));
    }
}
