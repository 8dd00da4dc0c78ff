use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::config::Config;

/// Read-through cache for listings, threads and stats.
///
/// Every operation is best effort. A failing backend reads as a miss and
/// writes are dropped, so callers always fall back to the store.
#[derive(Clone)]
pub struct Cache {
    backend: Backend,
    prefix: String,
}

#[derive(Clone)]
enum Backend {
    Redis(ConnectionManager),
    Memory(Arc<RwLock<HashMap<String, MemoryEntry>>>),
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

const SCAN_BATCH: usize = 200;

impl Cache {
    pub async fn connect(config: &Config) -> Result<Self, redis::RedisError> {
        let client = Client::open(config.redis_url())?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            backend: Backend::Redis(conn),
            prefix: config.redis.key_prefix.clone(),
        })
    }

    pub fn in_memory(prefix: impl Into<String>) -> Self {
        Self {
            backend: Backend::Memory(Arc::new(RwLock::new(HashMap::new()))),
            prefix: prefix.into(),
        }
    }

    /// Redis when enabled and reachable, otherwise the in-process map.
    pub async fn from_config(config: &Config) -> Self {
        if config.redis.enabled {
            match Self::connect(config).await {
                Ok(cache) => return cache,
                Err(e) => tracing::warn!("Redis unavailable, using in-memory cache: {e}"),
            }
        }
        Self::in_memory(config.redis.key_prefix.clone())
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            Backend::Redis(_) => "redis",
            Backend::Memory(_) => "memory",
        }
    }

    fn key(&self, k: &str) -> String {
        format!("{}{}", self.prefix, k)
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let k = self.key(key);
        match &self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                match conn.get::<_, Option<String>>(&k).await {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::debug!(key = %k, "cache read failed: {e}");
                        None
                    }
                }
            }
            Backend::Memory(map) => {
                let now = Instant::now();
                {
                    let entries = map.read().await;
                    match entries.get(&k) {
                        Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
                        None => return None,
                        Some(_) => {}
                    }
                }
                map.write().await.remove(&k);
                None
            }
        }
    }

    pub async fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key)
            .await
            .and_then(|s| serde_json::from_str(&s).ok())
    }

    pub async fn set(&self, key: &str, value: &str, ttl_secs: u64) {
        let k = self.key(key);
        match &self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                let res: Result<(), _> = if ttl_secs > 0 {
                    conn.set_ex(&k, value, ttl_secs).await
                } else {
                    conn.set(&k, value).await
                };
                if let Err(e) = res {
                    tracing::debug!(key = %k, "cache write failed: {e}");
                }
            }
            Backend::Memory(map) => {
                let expires_at = (ttl_secs > 0).then(|| Instant::now() + Duration::from_secs(ttl_secs));
                map.write().await.insert(
                    k,
                    MemoryEntry {
                        value: value.to_string(),
                        expires_at,
                    },
                );
            }
        }
    }

    pub async fn set_json<T: serde::Serialize>(&self, key: &str, value: &T, ttl_secs: u64) {
        if let Ok(json) = serde_json::to_string(value) {
            self.set(key, &json, ttl_secs).await;
        }
    }

    pub async fn del(&self, key: &str) {
        let k = self.key(key);
        match &self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                let res: Result<(), _> = conn.del(&k).await;
                if let Err(e) = res {
                    tracing::debug!(key = %k, "cache delete failed: {e}");
                }
            }
            Backend::Memory(map) => {
                map.write().await.remove(&k);
            }
        }
    }

    /// Removes every key starting with `prefix`; returns how many were dropped.
    pub async fn del_prefix(&self, prefix: &str) -> usize {
        let full = self.key(prefix);
        match &self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                match scan_keys(&mut conn, &format!("{full}*")).await {
                    Ok(keys) if keys.is_empty() => 0,
                    Ok(keys) => {
                        let removed = keys.len();
                        let res: Result<(), _> = conn.del(keys).await;
                        if let Err(e) = res {
                            tracing::debug!(prefix = %full, "cache invalidation failed: {e}");
                            return 0;
                        }
                        removed
                    }
                    Err(e) => {
                        tracing::debug!(prefix = %full, "cache scan failed: {e}");
                        0
                    }
                }
            }
            Backend::Memory(map) => {
                let mut entries = map.write().await;
                let before = entries.len();
                entries.retain(|k, _| !k.starts_with(&full));
                before - entries.len()
            }
        }
    }

    /// Drops expired in-memory entries. Redis expires keys on its own.
    pub async fn sweep(&self) -> usize {
        match &self.backend {
            Backend::Redis(_) => 0,
            Backend::Memory(map) => {
                let now = Instant::now();
                let mut entries = map.write().await;
                let before = entries.len();
                entries.retain(|_, entry| !entry.is_expired(now));
                before - entries.len()
            }
        }
    }

    pub async fn health_check(&self) -> bool {
        match &self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                redis::cmd("PING")
                    .query_async::<_, String>(&mut conn)
                    .await
                    .is_ok()
            }
            Backend::Memory(_) => true,
        }
    }
}

async fn scan_keys(
    conn: &mut ConnectionManager,
    pattern: &str,
) -> Result<Vec<String>, redis::RedisError> {
    let mut cursor: u64 = 0;
    let mut keys = Vec::new();
    loop {
        let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(SCAN_BATCH)
            .query_async(conn)
            .await?;
        keys.extend(batch);
        if next == 0 {
            return Ok(keys);
        }
        cursor = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_backend_round_trips_json() {
        let cache = Cache::in_memory("t:");
        cache.set_json("stats:all", &vec![1, 2, 3], 60).await;
        assert_eq!(cache.get_json::<Vec<i32>>("stats:all").await, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn del_drops_only_the_named_key() {
        let cache = Cache::in_memory("t:");
        cache.set("thread:a", "x", 60).await;
        cache.set("thread:b", "y", 60).await;
        cache.del("thread:a").await;
        cache.del("thread:missing").await;
        assert_eq!(cache.get("thread:a").await, None);
        assert_eq!(cache.get("thread:b").await.as_deref(), Some("y"));
    }

    #[tokio::test]
    async fn prefix_invalidation_only_touches_matching_keys() {
        let cache = Cache::in_memory("t:");
        cache.set("comments:list:s=a:p=1", "x", 60).await;
        cache.set("comments:list:s=a:p=2", "x", 60).await;
        cache.set("comments:list:s=b:p=1", "x", 60).await;

        assert_eq!(cache.del_prefix("comments:list:s=a:").await, 2);
        assert!(cache.get("comments:list:s=b:p=1").await.is_some());
    }

    #[tokio::test]
    async fn expired_entries_read_as_misses_and_are_swept() {
        let cache = Cache::in_memory("t:");
        if let Backend::Memory(map) = &cache.backend {
            map.write().await.insert(
                "t:old".to_string(),
                MemoryEntry {
                    value: "v".to_string(),
                    expires_at: Some(Instant::now() - Duration::from_secs(1)),
                },
            );
            map.write().await.insert(
                "t:older".to_string(),
                MemoryEntry {
                    value: "v".to_string(),
                    expires_at: Some(Instant::now() - Duration::from_secs(5)),
                },
            );
        }
        assert_eq!(cache.get("old").await, None);
        assert_eq!(cache.sweep().await, 1);
    }
}
