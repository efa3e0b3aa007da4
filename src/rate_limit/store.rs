use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::counter::RateLimitCounter;
use crate::database::DatabaseError;
use crate::error::ApiError;

/// Shared persistence for rate-limit counters
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn load(&self, identifier: &str) -> Result<Option<RateLimitCounter>, ApiError>;

    async fn save(&self, counter: &RateLimitCounter) -> Result<(), ApiError>;

    /// Remove every counter whose window closed before `now`; returns the number removed
    async fn purge_expired(&self, now: i64) -> Result<u64, ApiError>;
}

#[derive(Default)]
pub struct MemoryRateLimitStore {
    counters: RwLock<HashMap<String, RateLimitCounter>>,
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.counters.read().await.len()
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn load(&self, identifier: &str) -> Result<Option<RateLimitCounter>, ApiError> {
        Ok(self.counters.read().await.get(identifier).cloned())
    }

    async fn save(&self, counter: &RateLimitCounter) -> Result<(), ApiError> {
        self.counters
            .write()
            .await
            .insert(counter.identifier.clone(), counter.clone());
        Ok(())
    }

    async fn purge_expired(&self, now: i64) -> Result<u64, ApiError> {
        let mut counters = self.counters.write().await;
        let before = counters.len();
        counters.retain(|_, counter| !counter.is_expired(now));
        Ok((before - counters.len()) as u64)
    }
}

/// Counters in a Postgres table shared by every server instance
pub struct PgRateLimitStore {
    pool: PgPool,
}

impl PgRateLimitStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the counter table if it does not exist yet
    pub async fn ensure_schema(&self) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rate_limit_counters (
                identifier TEXT PRIMARY KEY,
                hits BIGINT NOT NULL DEFAULT 0,
                timestamp BIGINT NOT NULL,
                expiration BIGINT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RateLimitStore for PgRateLimitStore {
    async fn load(&self, identifier: &str) -> Result<Option<RateLimitCounter>, ApiError> {
        let counter = sqlx::query_as::<_, RateLimitCounter>(
            "SELECT identifier, hits, timestamp, expiration FROM rate_limit_counters WHERE identifier = $1",
        )
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from)?;
        Ok(counter)
    }

    async fn save(&self, counter: &RateLimitCounter) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            INSERT INTO rate_limit_counters (identifier, hits, timestamp, expiration)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (identifier) DO UPDATE
            SET hits = EXCLUDED.hits, timestamp = EXCLUDED.timestamp, expiration = EXCLUDED.expiration
            "#,
        )
        .bind(&counter.identifier)
        .bind(counter.hits)
        .bind(counter.timestamp)
        .bind(counter.expiration)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;
        Ok(())
    }

    async fn purge_expired(&self, now: i64) -> Result<u64, ApiError> {
        let result = sqlx::query("DELETE FROM rate_limit_counters WHERE expiration < $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from)?;
        Ok(result.rows_affected())
    }
}
