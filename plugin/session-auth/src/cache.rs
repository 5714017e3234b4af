//! Cache Store
//!
//! Shared TTL-aware key/value store holding one-time codes and rate-limit
//! counters. Every primitive is atomic on a single key; single-use code
//! redemption and counter windows depend on that, so implementations must not
//! emulate them with a read followed by a write.

use crate::error::AuthError;

use async_trait::async_trait;
use deadpool_redis::redis::{cmd, Script};
use deadpool_redis::{Config as RedisConfig, Pool, Runtime};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;

/// Primitives the one-time code service relies on
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Value stored under `key`, if present and unexpired
    async fn get(&self, key: &str) -> Result<Option<String>, AuthError>;

    /// Store `value` under `key`, replacing any previous value and TTL
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AuthError>;

    /// Store `value` only if `key` is absent; `true` when this call wrote it
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, AuthError>;

    /// Add one to the integer at `key` (absent counts as zero)
    async fn increment(&self, key: &str) -> Result<i64, AuthError>;

    /// Add one to the counter at `key`, giving it `ttl` only when this call created it
    async fn increment_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, AuthError>;

    /// Remaining lifetime of `key`; `None` when absent or without expiry
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, AuthError>;

    /// Remove keys, returning how many existed
    async fn delete(&self, keys: &[&str]) -> Result<u64, AuthError>;

    /// Release connections
    async fn close(&self) -> Result<(), AuthError> {
        Ok(())
    }
}

// ============================================
// Redis
// ============================================

const INCREMENT_WITH_EXPIRY: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// Redis-backed cache shared by every process of the deployment
pub struct RedisCache {
    pool: Pool,
    increment_script: Script,
}

impl RedisCache {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            increment_script: Script::new(INCREMENT_WITH_EXPIRY),
        }
    }

    /// Build a connection pool for `url` (`redis://host:port/db`)
    pub fn from_url(url: &str) -> Result<Self, AuthError> {
        let pool = RedisConfig::from_url(url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|err| AuthError::Config(format!("invalid REDIS_URL: {err}")))?;
        Ok(Self::new(pool))
    }

    /// Round-trip check used at startup
    pub async fn ping(&self) -> Result<(), AuthError> {
        let mut conn = self.pool.get().await?;
        cmd("PING").query_async::<_, String>(&mut conn).await?;
        tracing::info!("Redis connection established");
        Ok(())
    }
}

fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, AuthError> {
        let mut conn = self.pool.get().await?;
        Ok(cmd("GET").arg(key).query_async(&mut conn).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AuthError> {
        let mut conn = self.pool.get().await?;
        cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(millis(ttl))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, AuthError> {
        let mut conn = self.pool.get().await?;
        let written: Option<String> = cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(written.is_some())
    }

    async fn increment(&self, key: &str) -> Result<i64, AuthError> {
        let mut conn = self.pool.get().await?;
        Ok(cmd("INCR").arg(key).query_async(&mut conn).await?)
    }

    async fn increment_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, AuthError> {
        let mut conn = self.pool.get().await?;
        Ok(self
            .increment_script
            .key(key)
            .arg(millis(ttl))
            .invoke_async(&mut conn)
            .await?)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, AuthError> {
        let mut conn = self.pool.get().await?;
        let remaining: i64 = cmd("PTTL").arg(key).query_async(&mut conn).await?;
        // -2: no such key, -1: no expiry
        Ok(u64::try_from(remaining).ok().map(Duration::from_millis))
    }

    async fn delete(&self, keys: &[&str]) -> Result<u64, AuthError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.pool.get().await?;
        let mut command = cmd("DEL");
        for key in keys {
            command.arg(*key);
        }
        Ok(command.query_async(&mut conn).await?)
    }

    async fn close(&self) -> Result<(), AuthError> {
        self.pool.close();
        tracing::info!("Redis pool closed");
        Ok(())
    }
}

// ============================================
// In-process
// ============================================

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// How often writes purge keys nobody reads again
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct Entries {
    map: HashMap<String, Entry>,
    next_sweep: Option<Instant>,
}

impl Entries {
    fn sweep_if_due(&mut self) {
        let now = Instant::now();
        if self.next_sweep.is_some_and(|at| at > now) {
            return;
        }

        let before = self.map.len();
        self.map.retain(|_, entry| entry.is_live(now));
        let purged = before - self.map.len();
        if purged > 0 {
            tracing::debug!(purged, remaining = self.map.len(), "Swept expired cache entries");
        }
        self.next_sweep = Some(now + SWEEP_INTERVAL);
    }
}

impl Deref for Entries {
    type Target = HashMap<String, Entry>;

    fn deref(&self) -> &Self::Target {
        &self.map
    }
}

impl DerefMut for Entries {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.map
    }
}

/// Single-process cache with the same atomicity as [`RedisCache`]
///
/// Suitable for tests and single-instance deployments only; state is not
/// shared between processes. Expired keys are dropped when read, and writes
/// purge every expired key at most once per [`SWEEP_INTERVAL`].
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<Entries>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    async fn writable(&self) -> MutexGuard<'_, Entries> {
        let mut entries = self.entries.lock().await;
        entries.sweep_if_due();
        entries
    }

    fn live<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
        let now = Instant::now();
        if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
            entries.remove(key);
        }
        entries.get_mut(key)
    }
}

fn parse_counter(value: &str) -> Result<i64, AuthError> {
    value.parse().map_err(|_| {
        tracing::error!("Cache value is not an integer counter");
        AuthError::Internal
    })
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, AuthError> {
        let mut entries = self.entries.lock().await;
        Ok(Self::live(&mut entries, key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AuthError> {
        let mut entries = self.writable().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, AuthError> {
        let mut entries = self.writable().await;
        if Self::live(&mut entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn increment(&self, key: &str) -> Result<i64, AuthError> {
        let mut entries = self.writable().await;
        match Self::live(&mut entries, key) {
            Some(entry) => {
                let count = parse_counter(&entry.value)? + 1;
                entry.value = count.to_string();
                Ok(count)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: "1".to_string(),
                        expires_at: None,
                    },
                );
                Ok(1)
            }
        }
    }

    async fn increment_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, AuthError> {
        let mut entries = self.writable().await;
        match Self::live(&mut entries, key) {
            Some(entry) => {
                let count = parse_counter(&entry.value)? + 1;
                entry.value = count.to_string();
                Ok(count)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: "1".to_string(),
                        expires_at: Some(Instant::now() + ttl),
                    },
                );
                Ok(1)
            }
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, AuthError> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        Ok(Self::live(&mut entries, key)
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    async fn delete(&self, keys: &[&str]) -> Result<u64, AuthError> {
        let mut entries = self.entries.lock().await;
        let mut removed = 0;
        for key in keys {
            if Self::live(&mut entries, key).is_some() {
                entries.remove(*key);
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_set_get_expire() {
        let cache = MemoryCache::new();
        cache.set("k", "v", Duration::from_secs(10)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_overwrites_value_and_ttl() {
        let cache = MemoryCache::new();
        cache.set("k", "old", Duration::from_secs(5)).await.unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        cache.set("k", "new", Duration::from_secs(5)).await.unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;

        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_if_absent() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(30);

        assert!(cache.set_if_absent("k", "first", ttl).await.unwrap());
        assert!(!cache.set_if_absent("k", "second", ttl).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("first"));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cache.set_if_absent("k", "third", ttl).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_increment_window() {
        let cache = MemoryCache::new();
        let window = Duration::from_secs(60);

        assert_eq!(cache.increment_with_expiry("c", window).await.unwrap(), 1);
        tokio::time::advance(Duration::from_secs(50)).await;
        // later increments keep the original window
        assert_eq!(cache.increment_with_expiry("c", window).await.unwrap(), 2);
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.increment_with_expiry("c", window).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_plain_increment_has_no_expiry() {
        let cache = MemoryCache::new();
        assert_eq!(cache.increment("c").await.unwrap(), 1);
        assert_eq!(cache.increment("c").await.unwrap(), 2);
        assert_eq!(cache.ttl("c").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_increment_non_counter() {
        let cache = MemoryCache::new();
        cache.set("k", "abc", Duration::from_secs(5)).await.unwrap();
        assert_eq!(cache.increment("k").await, Err(AuthError::Internal));
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_purge_abandoned_keys() {
        let cache = MemoryCache::new();
        for owner in 0..10_000 {
            let key = format!("otp:verify:requests:{owner}@example.com");
            cache
                .increment_with_expiry(&key, Duration::from_secs(1))
                .await
                .unwrap();
        }
        cache.set("live", "v", Duration::from_secs(3600)).await.unwrap();
        assert_eq!(cache.entries.lock().await.len(), 10_001);

        tokio::time::advance(Duration::from_secs(3600)).await;
        cache.set("fresh", "v", Duration::from_secs(60)).await.unwrap();

        let entries = cache.entries.lock().await;
        assert_eq!(entries.len(), 1);
        assert!(entries.contains_key("fresh"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl() {
        let cache = MemoryCache::new();
        assert_eq!(cache.ttl("missing").await.unwrap(), None);

        cache.set("k", "v", Duration::from_secs(30)).await.unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cache.ttl("k").await.unwrap(), Some(Duration::from_secs(20)));
    }

    #[tokio::test]
    async fn test_delete_counts_existing() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(30);
        cache.set("a", "1", ttl).await.unwrap();
        cache.set("b", "2", ttl).await.unwrap();

        assert_eq!(cache.delete(&["a", "b", "c"]).await.unwrap(), 2);
        assert_eq!(cache.delete(&["a"]).await.unwrap(), 0);
        assert_eq!(cache.delete(&[]).await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_delete_has_one_winner() {
        let cache = Arc::new(MemoryCache::new());
        cache.set("k", "v", Duration::from_secs(30)).await.unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.delete(&["k"]).await.unwrap() })
            })
            .collect();

        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }
        assert_eq!(total, 1);
    }

    #[test]
    fn test_redis_url_rejected() {
        assert!(matches!(
            RedisCache::from_url("not a url"),
            Err(AuthError::Config(_))
        ));
    }
}
