//! Explicit cache abstraction injected into the managers.
//!
//! `CacheBackend` stores JSON values by key. `ResourceCache` sits on top of a
//! backend, derives stable keys from their parts and remembers which keys were
//! issued under which tag so a whole group can be dropped at once.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    fn set(&self, key: &str, value: Value, ttl: Option<Duration>);

    fn delete(&self, key: &str);
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// Process-local backend
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry whose ttl has run out
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        let now = Instant::now();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }
}

impl CacheBackend for MemoryCache {
    fn get(&self, key: &str) -> Option<Value> {
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            let entry = entries.get(key)?;
            if !entry.is_expired(Instant::now()) {
                return Some(entry.value.clone());
            }
        }
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries
            .get(key)
            .is_some_and(|entry| entry.is_expired(Instant::now()))
        {
            entries.remove(key);
        }
        None
    }

    fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        entries.retain(|_, entry| !entry.is_expired(now));
        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
    }

    fn delete(&self, key: &str) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
    }
}

/// Keys handed out per tag, plus when each expiring key lapses
#[derive(Debug, Default)]
struct IssuedKeys {
    by_tag: HashMap<String, HashSet<String>>,
    expires: HashMap<String, Instant>,
}

impl IssuedKeys {
    fn forget(&mut self, keys: &HashSet<String>) {
        for tagged in self.by_tag.values_mut() {
            tagged.retain(|k| !keys.contains(k));
        }
        self.by_tag.retain(|_, tagged| !tagged.is_empty());
        self.expires.retain(|k, _| !keys.contains(k));
    }

    fn take_expired(&mut self, now: Instant) -> HashSet<String> {
        let expired: HashSet<String> = self
            .expires
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        if !expired.is_empty() {
            self.forget(&expired);
        }
        expired
    }
}

/// Tag-aware cache front used for rendered records and version lookups
#[derive(Clone)]
pub struct ResourceCache {
    backend: Arc<dyn CacheBackend>,
    issued: Arc<RwLock<IssuedKeys>>,
    ttl: Option<Duration>,
}

impl ResourceCache {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Option<Duration>) -> Self {
        Self {
            backend,
            issued: Arc::new(RwLock::new(IssuedKeys::default())),
            ttl,
        }
    }

    pub fn in_memory(ttl: Option<Duration>) -> Self {
        Self::new(Arc::new(MemoryCache::new()), ttl)
    }

    /// Build a namespaced key; the parts are hashed so arbitrary input stays short
    pub fn key(namespace: &str, parts: &[&str]) -> String {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        let digest = hasher.finalize();
        let hex: String = digest.iter().take(16).map(|b| format!("{:02x}", b)).collect();
        format!("{}:{}", namespace, hex)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.backend.get(key)
    }

    /// Store a value and register the key under every tag.
    ///
    /// Keys whose ttl has lapsed are forgotten here, so the tag registry only
    /// tracks entries the backend may still hold.
    pub fn set<I, T>(&self, key: &str, value: Value, tags: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.backend.set(key, value, self.ttl);
        let expired = {
            let mut issued = self.issued.write().unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();
            match self.ttl {
                Some(ttl) => issued.expires.insert(key.to_string(), now + ttl),
                None => issued.expires.remove(key),
            };
            for tag in tags {
                issued
                    .by_tag
                    .entry(tag.into())
                    .or_default()
                    .insert(key.to_string());
            }
            issued.take_expired(now)
        };
        for stale in &expired {
            self.backend.delete(stale);
        }
        if !expired.is_empty() {
            tracing::debug!("Forgot {} expired cache keys", expired.len());
        }
    }

    /// Drop every key issued under `tag`; returns how many keys were removed
    pub fn invalidate_tag(&self, tag: &str) -> usize {
        let keys = {
            let mut issued = self.issued.write().unwrap_or_else(PoisonError::into_inner);
            let keys = issued.by_tag.remove(tag).unwrap_or_default();
            // A key may be registered under several tags
            issued.forget(&keys);
            keys
        };
        for key in &keys {
            self.backend.delete(key);
        }
        if !keys.is_empty() {
            tracing::debug!("Invalidated {} cache entries for tag '{}'", keys.len(), tag);
        }
        keys.len()
    }

    /// Drop everything this cache ever issued
    pub fn invalidate_all(&self) -> usize {
        let all: Vec<String> = {
            let mut issued = self.issued.write().unwrap_or_else(PoisonError::into_inner);
            issued.expires.clear();
            issued.by_tag.drain().flat_map(|(_, keys)| keys).collect()
        };
        let unique: HashSet<String> = all.into_iter().collect();
        for key in &unique {
            self.backend.delete(key);
        }
        unique.len()
    }

    pub fn issued_keys(&self, tag: &str) -> usize {
        self.issued
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_tag
            .get(tag)
            .map(HashSet::len)
            .unwrap_or(0)
    }
}
