use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::models::{ComparablesResult, DataVersion};

const KEY_PREFIX: &str = "comps";

/// Errors that can occur with cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalidation error: {0}")]
    Invalidation(String),
}

/// Cache key: subject plus a fingerprint of everything that shapes the result
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub subject_id: String,
    pub fingerprint: String,
}

impl CacheKey {
    pub fn new(subject_id: &str, fingerprint: String) -> Self {
        Self {
            subject_id: subject_id.trim().to_string(),
            fingerprint,
        }
    }

    /// Redis glob matching every key of one subject
    fn subject_pattern(subject_id: &str) -> String {
        let mut escaped = String::new();
        for ch in Self::subject_prefix(subject_id).chars() {
            if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
                escaped.push('\\');
            }
            escaped.push(ch);
        }
        escaped.push('*');
        escaped
    }

    /// Length-prefixed so no subject's prefix is a prefix of another's keys
    fn subject_prefix(subject_id: &str) -> String {
        let id = subject_id.trim();
        format!("{}:{}:{}:", KEY_PREFIX, id.len(), id)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", Self::subject_prefix(&self.subject_id), self.fingerprint)
    }
}

/// Stable fingerprint of a serializable configuration value.
///
/// blake3 over its JSON encoding, truncated to 16 bytes of hex.
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> Result<String, CacheError> {
    let bytes = serde_json::to_vec(value)?;
    let hash = blake3::hash(&bytes);
    Ok(hash.to_hex()[..32].to_string())
}

/// Stored value: the result plus the data version it was computed against
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub data_version: DataVersion,
    pub result: ComparablesResult,
}

/// Cache statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub l1_size: u64,
    pub hits: u64,
    pub misses: u64,
    pub stale: u64,
    pub hit_rate: f64,
}

/// Two-tier result cache.
///
/// L1 is an in-process moka cache bounded by entry count and age. L2 is an
/// optional Redis instance shared across processes. Redis failures are
/// logged and treated as misses; they never fail a lookup.
pub struct ResultCache {
    redis: Option<Arc<tokio::sync::Mutex<ConnectionManager>>>,
    l1_cache: moka::future::Cache<String, Arc<CacheEntry>>,
    ttl_secs: u64,
    hits: AtomicU64,
    misses: AtomicU64,
    stale: AtomicU64,
}

impl ResultCache {
    /// In-process cache only
    pub fn in_memory(l1_size: u64, ttl_secs: u64) -> Self {
        let l1_cache = moka::future::CacheBuilder::new(l1_size)
            .time_to_live(Duration::from_secs(ttl_secs))
            .support_invalidation_closures()
            .build();

        Self {
            redis: None,
            l1_cache,
            ttl_secs,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stale: AtomicU64::new(0),
        }
    }

    /// In-process cache backed by Redis
    pub async fn with_redis(redis_url: &str, l1_size: u64, ttl_secs: u64) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)?;
        let redis = redis::aio::ConnectionManager::new(client).await?;

        Ok(Self {
            redis: Some(Arc::new(tokio::sync::Mutex::new(redis))),
            ..Self::in_memory(l1_size, ttl_secs)
        })
    }

    /// Entry for `key` if it was computed against `version`
    pub async fn get(&self, key: &CacheKey, version: DataVersion) -> Option<ComparablesResult> {
        let key_str = key.to_string();

        let entry = match self.l1_cache.get(&key_str).await {
            Some(entry) => {
                tracing::trace!("L1 cache hit: {}", key_str);
                Some(entry)
            }
            None => self.l2_get(&key_str).await,
        };

        match entry {
            Some(entry) if entry.data_version == version => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.result.clone())
            }
            Some(entry) => {
                tracing::debug!(
                    "Stale cache entry {} (cached {}, current {})",
                    key_str,
                    entry.data_version,
                    version
                );
                self.stale.fetch_add(1, Ordering::Relaxed);
                self.l1_cache.invalidate(&key_str).await;
                None
            }
            None => {
                tracing::trace!("Cache miss: {}", key_str);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn l2_get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        let redis = self.redis.as_ref()?;

        let mut conn = redis.lock().await;
        let value: Result<Option<String>, redis::RedisError> =
            redis::cmd("GET").arg(key).query_async(&mut *conn).await;
        drop(conn);

        let json = match value {
            Ok(value) => value?,
            Err(e) => {
                tracing::warn!("Redis GET failed for {}: {}", key, e);
                return None;
            }
        };

        match serde_json::from_str::<CacheEntry>(&json) {
            Ok(entry) => {
                tracing::trace!("L2 cache hit: {}", key);
                let entry = Arc::new(entry);
                self.l1_cache.insert(key.to_string(), entry.clone()).await;
                Some(entry)
            }
            Err(e) => {
                tracing::warn!("Discarding undecodable L2 entry {}: {}", key, e);
                None
            }
        }
    }

    /// Store a result in both tiers
    pub async fn insert(&self, key: &CacheKey, version: DataVersion, result: &ComparablesResult) {
        let key_str = key.to_string();
        let entry = Arc::new(CacheEntry {
            data_version: version,
            result: result.clone(),
        });

        if let Some(redis) = &self.redis {
            if let Err(e) = self.l2_set(redis, &key_str, &entry).await {
                tracing::warn!("Redis SETEX failed for {}: {}", key_str, e);
            }
        }

        self.l1_cache.insert(key_str.clone(), entry).await;
        tracing::trace!("Cache set: {}", key_str);
    }

    async fn l2_set(
        &self,
        redis: &tokio::sync::Mutex<ConnectionManager>,
        key: &str,
        entry: &CacheEntry,
    ) -> Result<(), CacheError> {
        let json = serde_json::to_string(entry)?;
        let mut conn = redis.lock().await;
        redis::cmd("SETEX")
            .arg(key)
            .arg(self.ttl_secs)
            .arg(json)
            .query_async::<()>(&mut *conn)
            .await?;
        Ok(())
    }

    /// Serve a fresh entry, or run `compute` and store what it returns.
    ///
    /// Concurrent misses on the same key may both compute; the last writer wins.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        key: &CacheKey,
        version: DataVersion,
        compute: F,
    ) -> Result<ComparablesResult, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ComparablesResult, E>>,
    {
        if let Some(result) = self.get(key, version).await {
            return Ok(result);
        }

        let result = compute().await?;
        self.insert(key, version, &result).await;
        Ok(result)
    }

    /// Drop every entry for one subject, whatever its fingerprint
    pub async fn invalidate_subject(&self, subject_id: &str) -> Result<(), CacheError> {
        let prefix = CacheKey::subject_prefix(subject_id);
        self.l1_cache
            .invalidate_entries_if(move |key, _| key.starts_with(&prefix))
            .map_err(|e| CacheError::Invalidation(e.to_string()))?;

        self.l2_delete_pattern(&CacheKey::subject_pattern(subject_id)).await?;
        tracing::debug!("Invalidated cached results for subject {}", subject_id.trim());
        Ok(())
    }

    /// Drop everything
    pub async fn clear(&self) -> Result<(), CacheError> {
        self.l1_cache.invalidate_all();
        self.l2_delete_pattern(&format!("{}:*", KEY_PREFIX)).await?;
        tracing::debug!("Cleared result cache");
        Ok(())
    }

    async fn l2_delete_pattern(&self, pattern: &str) -> Result<(), CacheError> {
        let Some(redis) = &self.redis else {
            return Ok(());
        };

        let mut conn = redis.lock().await;
        let keys: Vec<String> = redis::cmd("KEYS").arg(pattern).query_async(&mut *conn).await?;

        if !keys.is_empty() {
            redis::cmd("DEL").arg(keys).query_async::<()>(&mut *conn).await?;
        }
        Ok(())
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let stale = self.stale.load(Ordering::Relaxed);
        let lookups = hits + misses + stale;

        CacheStats {
            l1_size: self.l1_cache.entry_count(),
            hits,
            misses,
            stale,
            hit_rate: if lookups > 0 { hits as f64 / lookups as f64 } else { 0.0 },
        }
    }
}
