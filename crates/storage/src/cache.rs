//! Metadata cache abstraction and the Redis-backed implementation.

use std::time::Duration;

use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Result type alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache is not connected")]
    NotConnected,

    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Cache payload error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Key of a cached metadata payload.
///
/// Keys form a two-level hierarchy: a country key and layer keys under it.
/// Invalidating a country key also drops every layer key of that country.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Country(String),
    Layer { country: String, name: String },
}

impl CacheKey {
    pub fn country(country: impl Into<String>) -> Self {
        CacheKey::Country(country.into())
    }

    pub fn layer(country: impl Into<String>, name: impl Into<String>) -> Self {
        CacheKey::Layer {
            country: country.into(),
            name: name.into(),
        }
    }

    /// Whether `key` is this key or lies beneath it.
    pub fn covers(&self, key: &str) -> bool {
        let prefix = self.to_string();
        key == prefix
            || key
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.starts_with(':'))
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::Country(country) => write!(f, "{}", country),
            CacheKey::Layer { country, name } => write!(f, "{}:{}", country, name),
        }
    }
}

/// Cache of assembled layer metadata.
///
/// Entries are never served past their ttl. `invalidate` must be visible to
/// every subsequent `get` once it returns.
#[async_trait]
pub trait MetadataCache: Send + Sync {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<serde_json::Value>>;

    async fn put(&self, key: &CacheKey, payload: serde_json::Value, ttl: Duration)
        -> CacheResult<()>;

    /// Remove `key` and every key beneath it. Returns the number removed.
    async fn invalidate(&self, key: &CacheKey) -> CacheResult<u64>;

    /// Acquire backend resources. Idempotent.
    async fn initialize(&self) -> CacheResult<()>;

    /// Release backend resources. Idempotent.
    async fn cleanup(&self) -> CacheResult<()>;
}

/// Redis-backed metadata cache shared by every service instance.
pub struct RedisMetadataCache {
    redis_url: String,
    namespace: String,
    conn: RwLock<Option<MultiplexedConnection>>,
}

impl RedisMetadataCache {
    /// Create an unconnected cache. Call [`MetadataCache::initialize`] before use.
    pub fn new(redis_url: impl Into<String>) -> Self {
        Self {
            redis_url: redis_url.into(),
            namespace: "layers".to_string(),
            conn: RwLock::new(None),
        }
    }

    /// Override the key namespace (default `layers`).
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    fn redis_key(&self, key: &CacheKey) -> String {
        format!("{}:{}", self.namespace, key)
    }

    async fn connection(&self) -> CacheResult<MultiplexedConnection> {
        self.conn
            .read()
            .await
            .as_ref()
            .cloned()
            .ok_or(CacheError::NotConnected)
    }
}

#[async_trait]
impl MetadataCache for RedisMetadataCache {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<serde_json::Value>> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn
            .get(self.redis_key(key))
            .await
            .map_err(|e| CacheError::Backend(format!("Cache get failed: {}", e)))?;

        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        key: &CacheKey,
        payload: serde_json::Value,
        ttl: Duration,
    ) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        let body = serde_json::to_string(&payload)?;
        let millis = ttl.as_millis().max(1) as u64;

        let _: () = conn
            .pset_ex(self.redis_key(key), body, millis)
            .await
            .map_err(|e| CacheError::Backend(format!("Cache set failed: {}", e)))?;
        Ok(())
    }

    async fn invalidate(&self, key: &CacheKey) -> CacheResult<u64> {
        let mut conn = self.connection().await?;
        let exact = self.redis_key(key);
        let pattern = format!("{}:*", escape_glob(&exact));

        let mut keys = vec![exact];
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await
                .map_err(|e| CacheError::Backend(format!("Pattern search failed: {}", e)))?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        let removed: u64 = conn
            .del(&keys)
            .await
            .map_err(|e| CacheError::Backend(format!("Delete failed: {}", e)))?;

        debug!(key = %key, removed = removed, "Invalidated cache keys");
        Ok(removed)
    }

    async fn initialize(&self) -> CacheResult<()> {
        let mut guard = self.conn.write().await;
        if guard.is_some() {
            return Ok(());
        }

        let client = Client::open(self.redis_url.as_str())
            .map_err(|e| CacheError::Backend(format!("Redis connection failed: {}", e)))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CacheError::Backend(format!("Redis connection failed: {}", e)))?;

        *guard = Some(conn);
        info!(namespace = %self.namespace, "Metadata cache connected to Redis");
        Ok(())
    }

    async fn cleanup(&self) -> CacheResult<()> {
        if self.conn.write().await.take().is_some() {
            info!("Metadata cache disconnected from Redis");
        }
        Ok(())
    }
}

/// Escape Redis glob metacharacters.
fn escape_glob(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
